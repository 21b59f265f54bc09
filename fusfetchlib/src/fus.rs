use std::{
    borrow::Cow,
    fmt,
    sync::Arc,
    time::Duration,
};

use log::debug;
use reqwest::{
    header::{
        HeaderMap, HeaderValue,
        AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, COOKIE, RANGE, SET_COOKIE, USER_AGENT,
    },
    Response, StatusCode,
};
use thiserror::Error;
use xmltree::{Element, XMLNode};

use crate::{
    crypto::{
        to_utf8_or_error_string,
        CryptoError, FileDecryptor, LogicCheckInput, Nonce, SessionCrypto,
    },
    imei::ImeiSource,
    range::ByteRange,
    retry::{classify_status, AttemptVerdict, IdentityRetry, MAX_IDENTITY_ATTEMPTS},
    stream::DownloadStream,
    version::{FwVersion, ParseFwVersionError},
};

const CATALOG_BASE_URL: &str = "https://fota-cloud-dn.ospserver.net";
const FUS_BASE_URL: &str = "https://neofussvr.sslcs.cdngc.net";
const DOWNLOAD_BASE_URL: &str = "http://cloud-neofussvr.samsungmobile.com";

const CLIENT_PRODUCT: &str = "Smart Switch";
const CLIENT_VERSION: &str = "4.3.23123_1";
const FUS_USER_AGENT: &str = "Kies2.0_FUS";
const SESSION_COOKIE: &str = "JSESSIONID";

/// Timeout for control-plane requests. The download stream itself only gets
/// a connect timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum FusError {
    #[error("Server did not provide a nonce value")]
    NonceNotFound,
    #[error("No firmware catalog exists for this model and region")]
    CatalogEmpty,
    #[error("Firmware catalog has no parseable latest version")]
    CatalogUnparseable,
    #[error("FUS rejected the session credentials")]
    Unauthorized,
    #[error("FUS server is unreachable")]
    Unreachable(#[source] reqwest::Error),
    #[error("Request to FUS timed out")]
    Timeout(#[source] reqwest::Error),
    #[error("FUS rejected the request: HTTP {0}")]
    ServerRejected(StatusCode),
    #[error("Unexpected FUS status code: {0}")]
    FusStatus(u16),
    #[error("No identity was accepted after {0} attempts")]
    MaxAttemptsExceeded(u32),
    #[error("Invalid or unsupported byte range")]
    InvalidRange,
    #[error("Download rejected by upstream: HTTP {0}")]
    UpstreamRejected(StatusCode),
    #[error("Invalid device identity (need 15-digit IMEI or 8-digit TAC): {0}")]
    InvalidIdentity(String),
    #[error("Could not find field '{0}' in FUS response")]
    MissingField(&'static str),
    #[error("Could not parse the value for field '{0}': '{1}'")]
    BadField(&'static str, String),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Failed to parse version string: {0}")]
    Version(#[from] ParseFwVersionError),
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("XML parse error: {0}")]
    XmlParse(#[from] xmltree::ParseError),
    #[error("XML error: {0}")]
    Xml(#[from] xmltree::Error),
}

impl FusError {
    /// Classify a transport-level failure from reqwest.
    pub(crate) fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e)
        } else if e.is_connect() {
            Self::Unreachable(e)
        } else {
            Self::Request(e)
        }
    }
}

/// A type representing the Authorization field for FUS requests.
#[derive(Debug, Default)]
struct Authorization {
    nonce: String,
    signature: String,
}

impl Authorization {
    /// The unauthenticated form used for the nonce challenge itself.
    fn empty() -> Self {
        Self::default()
    }

    fn for_session(session: &Session) -> Self {
        Self {
            nonce: session.raw_nonce.clone(),
            signature: session.signature.clone(),
        }
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only the new auth mechanism (encrypted nonces) is supported
        write!(
            f,
            "FUS nonce=\"{}\", signature=\"{}\", nc=\"\", type=\"\", realm=\"\", newauth=\"1\"",
            self.nonce,
            self.signature,
        )
    }
}

/// An authenticated FUS session.
///
/// A session is only valid for the nonce that produced it: whenever a
/// response carries a new nonce, the signature material is re-derived before
/// the session is used again. Every top-level operation creates its own
/// session; sessions are never shared across concurrent operations.
#[derive(Clone, Debug)]
pub struct Session {
    /// Nonce exactly as issued by the server (base64, encrypted)
    raw_nonce: String,
    /// Decoded nonce
    nonce: Nonce,
    /// Authorization signature derived from the nonce
    signature: String,
    /// Server-assigned session cookie value
    session_id: Option<String>,
}

impl Session {
    pub(crate) fn from_response(
        crypto: &dyn SessionCrypto,
        response: &Response,
    ) -> Result<Self, FusError> {
        Self::from_headers(crypto, response.headers())
    }

    fn from_headers(
        crypto: &dyn SessionCrypto,
        headers: &HeaderMap,
    ) -> Result<Self, FusError> {
        let raw = headers.get("NONCE")
            .and_then(|v| v.to_str().ok())
            .ok_or(FusError::NonceNotFound)?;

        let nonce = crypto.decode_nonce(raw.as_bytes())?;
        debug!("New session nonce: {nonce}");

        Ok(Self {
            raw_nonce: raw.to_owned(),
            signature: crypto.derive_signature(&nonce),
            nonce,
            session_id: session_cookie(headers),
        })
    }

    /// Pick up nonce and cookie rotation from a response. A new nonce
    /// invalidates the derived signature, so it is recomputed here; skipping
    /// this before the next request would get that request rejected.
    pub(crate) fn refresh(
        &mut self,
        crypto: &dyn SessionCrypto,
        response: &Response,
    ) -> Result<(), FusError> {
        self.refresh_from_headers(crypto, response.headers())
    }

    fn refresh_from_headers(
        &mut self,
        crypto: &dyn SessionCrypto,
        headers: &HeaderMap,
    ) -> Result<(), FusError> {
        if let Some(raw) = headers.get("NONCE").and_then(|v| v.to_str().ok()) {
            debug!("Server rotated the session nonce");

            self.nonce = crypto.decode_nonce(raw.as_bytes())?;
            self.signature = crypto.derive_signature(&self.nonce);
            self.raw_nonce = raw.to_owned();
        }

        if let Some(id) = session_cookie(headers) {
            self.session_id = Some(id);
        }

        Ok(())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Logic-check value authenticating the given request field.
    pub fn logic_check(&self, input: LogicCheckInput) -> String {
        self.nonce.logic_check(input)
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers.get_all(SET_COOKIE).iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            let (name, rest) = cookie.split_once('=')?;
            if name.trim() != SESSION_COOKIE {
                return None;
            }

            Some(rest.split(';').next().unwrap_or("").trim().to_owned())
        })
}

/// Key-derivation scheme for a delivered binary, selected by filename
/// convention.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncryptVersion {
    V2,
    V4,
}

impl EncryptVersion {
    pub fn from_filename(filename: &str) -> Self {
        if filename.ends_with('4') {
            Self::V4
        } else {
            Self::V2
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::V2 => 2,
            Self::V4 => 4,
        }
    }
}

/// Parsed version manifest for one region/model pair.
#[derive(Clone, Debug)]
pub struct FirmwareList {
    /// The current firmware version
    pub latest: FwVersion,
    /// Older upgrade versions, in manifest order
    pub alternates: Vec<FwVersion>,
}

impl FirmwareList {
    /// Parse a version manifest document.
    pub fn from_xml(xml: &str) -> Result<Self, FusError> {
        let root = Element::parse(xml.as_bytes())
            .map_err(|_| FusError::CatalogUnparseable)?;

        let version = root.get_child("firmware")
            .and_then(|e| e.get_child("version"))
            .ok_or(FusError::CatalogEmpty)?;

        let latest = version.get_child("latest")
            .and_then(|e| e.get_text())
            .ok_or(FusError::CatalogUnparseable)?
            .trim()
            .parse()
            .map_err(|_| FusError::CatalogUnparseable)?;

        // <upgrade> holds either a single <value> or a list of them; both
        // shapes collapse into one sequence here
        let mut alternates = vec![];

        if let Some(upgrade) = version.get_child("upgrade") {
            for value in upgrade.children.iter().filter_map(XMLNode::as_element) {
                if value.name != "value" {
                    continue;
                }
                let text = match value.get_text() {
                    Some(t) => t.trim().to_owned(),
                    None => continue,
                };

                // Entries without at least two path separators are
                // placeholders, not real firmware
                if text.matches('/').count() < 2 {
                    continue;
                }

                match text.parse() {
                    Ok(v) => alternates.push(v),
                    Err(e) => debug!("Skipping unparseable alternate '{text}': {e}"),
                }
            }
        }

        Ok(Self {
            latest,
            alternates,
        })
    }

    /// All known versions, latest first.
    pub fn versions(&self) -> impl Iterator<Item = &FwVersion> {
        std::iter::once(&self.latest).chain(self.alternates.iter())
    }
}

/// Metadata for one downloadable firmware binary, as returned by the
/// binary-info endpoint.
#[derive(Clone, Debug)]
pub struct BinaryInfo {
    /// Model number the lookup was made for
    pub model: String,
    /// Region code the lookup was made for
    pub region: String,
    /// Firmware version the lookup was made for
    pub version: FwVersion,
    /// Human-readable model/marketing name
    pub display_name: String,
    /// Firmware OS/platform
    pub platform: String,
    /// Friendly OS version name
    pub os_version: String,
    /// Changelog URL, if the server published one
    pub description_url: Option<String>,
    /// Binary filename. May carry an `.enc2`/`.enc4` extension
    pub filename: String,
    /// Remote directory component for the download request
    pub path: String,
    /// Binary size in bytes
    pub size: u64,
    /// CRC32 checksum of the (encrypted) binary
    pub crc: u32,
    /// Modification timestamp in the server's `yyyyMMddHHmmss` form
    pub last_modified: u64,
    /// Which key-derivation scheme decrypts this binary
    pub encrypt_version: EncryptVersion,
    /// First input to the v4 key derivation
    latest_version_field: Option<String>,
    /// Second input to the v4 key derivation
    logic_value_factory: Option<String>,
}

impl BinaryInfo {
    /// Extract binary metadata from a successful binary-info response body.
    pub fn from_xml(
        root: &Element,
        model: &str,
        region: &str,
        version: &FwVersion,
    ) -> Result<Self, FusError> {
        macro_rules! get_value {
            ($name:expr) => {
                get_body_field(root, &[$name])
                    .ok_or(FusError::MissingField($name))?
            }
        }
        macro_rules! get_string {
            ($name:expr) => {
                get_value!($name).to_string()
            }
        }
        macro_rules! get_parsed {
            ($name:expr) => {
                {
                    let value = get_value!($name);
                    value.parse().map_err(|_| FusError::BadField(
                        $name, value.to_string()))?
                }
            }
        }

        let filename: String = get_string!("BINARY_NAME");

        Ok(Self {
            model: model.to_owned(),
            region: region.to_owned(),
            version: version.clone(),
            display_name: get_string!("DEVICE_MODEL_DISPLAYNAME"),
            platform: get_string!("DEVICE_PLATFORM"),
            os_version: get_string!("CURRENT_OS_VERSION"),
            description_url: get_body_field(root, &["DESCRIPTION", "ADD_DESCRIPTION"])
                .map(|s| s.to_string()),
            path: get_string!("MODEL_PATH"),
            size: get_parsed!("BINARY_BYTE_SIZE"),
            crc: get_parsed!("BINARY_CRC"),
            last_modified: get_parsed!("LAST_MODIFIED"),
            encrypt_version: EncryptVersion::from_filename(&filename),
            latest_version_field: get_body_field(
                root, &["LATEST_FW_VERSION", "ADD_LATEST_FW_VERSION"],
            ).map(|s| s.to_string()),
            logic_value_factory: get_body_field(root, &["LOGIC_VALUE_FACTORY"])
                .map(|s| s.to_string()),
            filename,
        })
    }

    /// Derive the key that decrypts this binary. The v2 scheme only uses the
    /// lookup inputs; the v4 scheme depends on fields the server returned
    /// alongside the metadata.
    pub fn encryption_key(&self, crypto: &dyn SessionCrypto) -> Result<[u8; 16], FusError> {
        match self.encrypt_version {
            EncryptVersion::V2 => Ok(crypto.file_key_v2(
                &self.version.to_string(),
                &self.model,
                &self.region,
            )),
            EncryptVersion::V4 => {
                let version_field = self.latest_version_field.as_deref()
                    .ok_or(FusError::MissingField("LATEST_FW_VERSION"))?;
                let logic_value = self.logic_value_factory.as_deref()
                    .ok_or(FusError::MissingField("LOGIC_VALUE_FACTORY"))?;

                Ok(crypto.file_key_v4(version_field, logic_value)?)
            }
        }
    }

    /// Filename with the encryption extension stripped.
    pub fn decrypted_filename(&self) -> String {
        self.filename
            .trim_end_matches(".enc4")
            .trim_end_matches(".enc2")
            .to_owned()
    }

    /// Full remote path used by the registration and download requests.
    pub fn remote_path(&self) -> String {
        format!("{}{}", self.path, self.filename)
    }
}

/// Builder type for creating FUS clients with non-default behavior.
#[derive(Clone)]
pub struct FusClientBuilder {
    crypto: Arc<dyn SessionCrypto>,
    ignore_tls_validation: bool,
}

impl FusClientBuilder {
    pub fn new(crypto: impl SessionCrypto + 'static) -> Self {
        Self {
            crypto: Arc::new(crypto),
            ignore_tls_validation: false,
        }
    }

    /// Ignore TLS certificate validation when performing HTTPS requests. By
    /// default, TLS certificate validation is enabled.
    pub fn ignore_tls_validation(mut self, value: bool) -> Self {
        self.ignore_tls_validation = value;
        self
    }

    /// Build the FUS client with the current options. This function fails if
    /// the TLS backend fails to initialize.
    pub fn build(&self) -> Result<FusClient, FusError> {
        FusClient::with_options(self)
    }
}

/// Type for interacting with the FUS service.
///
/// The client itself holds no session state; every top-level operation
/// acquires and owns its session, so independent operations can run
/// concurrently on one client.
pub struct FusClient {
    client: reqwest::Client,
    crypto: Arc<dyn SessionCrypto>,
}

impl FusClient {
    fn with_options(options: &FusClientBuilder) -> Result<Self, FusError> {
        debug!("TLS validation enabled: {}", !options.ignore_tls_validation);

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(FUS_USER_AGENT));

        let client = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(options.ignore_tls_validation)
            .connect_timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .referer(false)
            .build()?;

        Ok(Self {
            client,
            crypto: options.crypto.clone(),
        })
    }

    /// Acquire a nonce challenge and derive a fresh session from it.
    pub async fn begin_session(&self) -> Result<Session, FusError> {
        let url = format!("{FUS_BASE_URL}/NF_DownloadGenerateNonce.do");
        debug!("Requesting nonce from: {url}");

        let r = self.client.post(&url)
            .header(AUTHORIZATION, Authorization::empty().to_string())
            .header(CONTENT_LENGTH, 0)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(FusError::from_transport)?;

        let status = r.status();
        if !status.is_success() {
            return Err(FusError::ServerRejected(status));
        }

        Session::from_response(self.crypto.as_ref(), &r)
    }

    /// Fetch the available firmware versions for a model and region code.
    pub async fn list_firmware(&self, region: &str, model: &str)
            -> Result<FirmwareList, FusError> {
        let url = format!("{CATALOG_BASE_URL}/firmware/{region}/{model}/version.xml");
        debug!("Catalog URL: {url}");

        let r = self.client.get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(FusError::from_transport)?;

        let status = r.status();
        if !status.is_success() {
            // The catalog server answers 403/404 for unknown devices
            return if status == StatusCode::FORBIDDEN || status == StatusCode::NOT_FOUND {
                Err(FusError::CatalogEmpty)
            } else {
                Err(FusError::ServerRejected(status))
            };
        }

        let data = r.text().await?;
        debug!("Catalog response: {data:?}");

        FirmwareList::from_xml(&data)
    }

    /// Look up binary metadata for a firmware version, cycling candidate
    /// device identities on transient rejection. Attempts are strictly
    /// sequential; each one performs a nonce round trip followed by the
    /// binary-info request. On success, the session used for the accepted
    /// attempt is returned alongside the metadata and remains valid for key
    /// derivation and the download that follows.
    pub async fn fetch_binary_info(
        &self,
        region: &str,
        model: &str,
        version: &FwVersion,
        identity: &ImeiSource,
    ) -> Result<(BinaryInfo, Session), FusError> {
        let url = format!("{FUS_BASE_URL}/NF_DownloadBinaryInform.do");
        let mut retry = IdentityRetry::new(identity.clone());

        while let Some((attempt, imei)) = retry.next_identity() {
            let mut session = self.begin_session().await?;
            let envelope = binary_inform_envelope(region, model, version, &imei, &session);
            let (status, root) = self.send_envelope(&url, &envelope, &mut session).await?;

            match classify_status(status) {
                AttemptVerdict::Accepted => {
                    debug!("Identity accepted on attempt {attempt}");

                    let info = BinaryInfo::from_xml(&root, model, region, version)?;
                    return Ok((info, session));
                }
                AttemptVerdict::IdentityRejected => {
                    debug!("Attempt {attempt}: identity rejected by FUS");
                }
                AttemptVerdict::Unauthorized => return Err(FusError::Unauthorized),
                AttemptVerdict::Fatal(code) => return Err(FusError::FusStatus(code)),
            }
        }

        Err(FusError::MaxAttemptsExceeded(MAX_IDENTITY_ATTEMPTS))
    }

    /// Derive the key that decrypts the given binary.
    pub fn encryption_key(&self, info: &BinaryInfo) -> Result<[u8; 16], FusError> {
        info.encryption_key(self.crypto.as_ref())
    }

    /// Register the intention to download a file. The service requires this
    /// before it will serve the byte stream for the same path and session.
    pub async fn init_download(
        &self,
        remote_path: &str,
        session: &mut Session,
    ) -> Result<(), FusError> {
        let filename = remote_path.rsplit('/').next().unwrap_or(remote_path);
        let envelope = binary_init_envelope(filename, session);

        let url = format!("{FUS_BASE_URL}/NF_DownloadBinaryInitForMass.do");
        let (status, _) = self.send_envelope(&url, &envelope, session).await?;

        if status != 200 {
            return Err(FusError::FusStatus(status));
        }

        Ok(())
    }

    /// Open the byte stream for a previously registered file. Range
    /// validation happens before any network traffic. A non-(200|206)
    /// answer is [`FusError::UpstreamRejected`].
    pub async fn open_download(
        &self,
        remote_path: &str,
        session: &mut Session,
        range: ByteRange,
        decrypt_key: Option<[u8; 16]>,
    ) -> Result<FileDownload, FusError> {
        range.check_decryptable(decrypt_key.is_some())?;

        // The service answers HTTP 405 if the filename is URL-encoded, so
        // the query string is assembled by hand.
        let url = format!("{DOWNLOAD_BASE_URL}/NF_DownloadBinaryForMass.do?file={remote_path}");
        debug!("Requesting {} from: {url}", range.to_header_value());

        let request = self.client.get(&url)
            .header(RANGE, range.to_header_value());
        let r = self.send_authed(request, session).await?;

        let status = r.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(FusError::UpstreamRejected(status));
        }

        Ok(FileDownload {
            response: r,
            decrypt_key,
        })
    }

    /// Send an authenticated FUS request. The session picks up any nonce or
    /// cookie rotation from the response before it is handed back.
    async fn send_authed(
        &self,
        request: reqwest::RequestBuilder,
        session: &mut Session,
    ) -> Result<Response, FusError> {
        let mut request = request.header(
            AUTHORIZATION,
            Authorization::for_session(session).to_string(),
        );
        if let Some(id) = session.session_id() {
            request = request.header(COOKIE, format!("{SESSION_COOKIE}={id}"));
        }

        let r = request.send().await.map_err(FusError::from_transport)?;
        session.refresh(self.crypto.as_ref(), &r)?;

        Ok(r)
    }

    /// POST an XML envelope, parse the XML response, and extract the
    /// protocol-level status code (which is distinct from the HTTP status).
    async fn send_envelope(
        &self,
        url: &str,
        body: &Element,
        session: &mut Session,
    ) -> Result<(u16, Element), FusError> {
        debug!("FUS URL: {url}");

        let mut buf = vec![];
        body.write(&mut buf)?;

        debug!("FUS request: {:?}", to_utf8_or_error_string(&buf));

        let request = self.client.post(url)
            .timeout(REQUEST_TIMEOUT)
            .body(buf);
        let r = self.send_authed(request, session).await?;

        let http_status = r.status();
        if !http_status.is_success() {
            return Err(FusError::ServerRejected(http_status));
        }

        let data = r.bytes().await?;
        debug!("FUS response: {:?}", to_utf8_or_error_string(&data));

        let root = Element::parse(data.as_ref())?;
        let status = get_elem_text(&root, &["FUSBody", "Results", "Status"])
            .and_then(|s| s.trim().parse().ok())
            .ok_or(FusError::MissingField("Status"))?;

        Ok((status, root))
    }
}

/// An open firmware download. Exposes the upstream framing headers and the
/// byte stream itself. Dropping this (or the stream made from it) releases
/// the upstream connection.
pub struct FileDownload {
    response: Response,
    decrypt_key: Option<[u8; 16]>,
}

impl FileDownload {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Upstream Content-Length. Callers serving a decrypted stream should
    /// withhold this, since padding removal changes the delivered length.
    pub fn content_length(&self) -> Option<u64> {
        self.response.headers().get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Upstream Content-Range, present for partial answers.
    pub fn content_range(&self) -> Option<String> {
        self.response.headers().get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    pub fn is_decrypting(&self) -> bool {
        self.decrypt_key.is_some()
    }

    /// Consume the download into a byte stream, decrypting on the fly when a
    /// key was attached.
    pub fn into_stream(self) -> DownloadStream {
        let decryptor = self.decrypt_key.map(|k| FileDecryptor::new(&k));

        DownloadStream::new(self.response.bytes_stream(), decryptor)
    }
}

fn text_node(name: &str, text: &str) -> XMLNode {
    let mut elem = Element::new(name);
    elem.children.push(XMLNode::Text(text.to_owned()));
    XMLNode::Element(elem)
}

fn data_node(name: &str, value: &str) -> XMLNode {
    let mut elem = Element::new(name);
    elem.children.push(text_node("Data", value));
    XMLNode::Element(elem)
}

/// Wrap body fields into the fixed FUSMsg envelope.
fn envelope(put_fields: Vec<XMLNode>) -> Element {
    let mut hdr = Element::new("FUSHdr");
    hdr.children.push(text_node("ProtoVer", "1.0"));

    let mut put = Element::new("Put");
    put.children = put_fields;

    let mut body = Element::new("FUSBody");
    body.children.push(XMLNode::Element(put));

    let mut msg = Element::new("FUSMsg");
    msg.children.push(XMLNode::Element(hdr));
    msg.children.push(XMLNode::Element(body));

    msg
}

fn binary_inform_envelope(
    region: &str,
    model: &str,
    version: &FwVersion,
    imei: &str,
    session: &Session,
) -> Element {
    let version_string = version.to_string();
    let logic_check = session.logic_check(LogicCheckInput::Data(version_string.as_bytes()));

    envelope(vec![
        data_node("ACCESS_MODE", "2"),
        data_node("BINARY_NATURE", "1"),
        data_node("CLIENT_PRODUCT", CLIENT_PRODUCT),
        data_node("CLIENT_VERSION", CLIENT_VERSION),
        data_node("DEVICE_FW_VERSION", &version_string),
        data_node("DEVICE_LOCAL_CODE", region),
        data_node("DEVICE_MODEL_NAME", model),
        data_node("DEVICE_IMEI_PUSH", imei),
        data_node("LOGIC_CHECK", &logic_check),
    ])
}

fn binary_init_envelope(filename: &str, session: &Session) -> Element {
    let logic_check = session.logic_check(LogicCheckInput::Filename(filename));

    envelope(vec![
        data_node("BINARY_FILE_NAME", filename),
        data_node("LOGIC_CHECK", &logic_check),
    ])
}

fn get_elem_text<'a>(elem: &'a Element, path: &[&str]) -> Option<Cow<'a, str>> {
    let mut result = Some(elem);

    for p in path {
        result = result.and_then(|e| e.get_child(*p));
    }

    result.map(|e| e.get_text().unwrap_or(Cow::Borrowed("")))
}

/// Field lookup under FUSBody/Put with an explicit ordered fallback: the
/// first name that is present in the response wins.
fn get_body_field<'a>(elem: &'a Element, names: &[&'static str]) -> Option<Cow<'a, str>> {
    names.iter()
        .find_map(|name| get_elem_text(elem, &["FUSBody", "Put", name, "Data"]))
}
