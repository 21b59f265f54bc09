use std::{
    fmt,
    str::FromStr,
};

use thiserror::Error;

/// Alphabet used for the revision digit of a build code.
const REVISION_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// A type representing the `<pda>/<csc>/<phone>/<data>` version string used by
/// the FUS protocol (eg. in the `DEVICE_FW_VERSION` field).
///
/// Version strings from the catalog may arrive with only 3 components or with
/// an empty `phone` component; both are normalized during parsing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FwVersion {
    /// Primary firmware version (`DEVICE_PDA_CODE1_VERSION`)
    pub pda: String,
    /// Carrier services version (`DEVICE_CSC_CODE2_VERSION`)
    pub csc: String,
    /// [Unknown] `phone` version (`DEVICE_PHONE_FONT_VERSION`)
    pub phone: String,
    /// [Unknown] `data` version (`DEVICE_CONTENTS_DATA_VERSION`)
    pub data: String,
}

impl FwVersion {
    pub fn new(pda: &str, csc: &str, phone: Option<&str>, data: Option<&str>)
            -> Self {
        Self {
            pda: pda.to_owned(),
            csc: csc.to_owned(),
            phone: match phone {
                Some(s) if !s.is_empty() => s.to_owned(),
                _ => pda.to_owned(),
            },
            data: match data {
                Some(s) => s.to_owned(),
                None => pda.to_owned(),
            },
        }
    }

    /// Decode the build metadata embedded in the last 6 characters of the
    /// PDA component. Codes beginning with `U` or `S` carry a bootloader
    /// class and an index in addition to the date fields; all other codes
    /// only encode year, month, and revision.
    pub fn build_info(&self) -> Result<FwBuildInfo, ParseFwVersionError> {
        let pda = self.pda.as_bytes();
        if pda.len() < 6 || !pda.is_ascii() {
            return Err(ParseFwVersionError::BuildCodeTooShort);
        }
        let code = &pda[pda.len() - 6..];

        let year = u16::try_from(i32::from(code[3]) - i32::from(b'R') + 2018)
            .map_err(|_| ParseFwVersionError::InvalidBuildCode)?;
        let month = code[4].checked_sub(b'A')
            .ok_or(ParseFwVersionError::InvalidBuildCode)?;
        let revision = REVISION_ALPHABET.iter()
            .position(|x| *x == code[5])
            .ok_or(ParseFwVersionError::InvalidBuildCode)? as u8;

        let (bootloader, major) = if code[0] == b'U' || code[0] == b'S' {
            // ASCII checked above, so the slice cannot be invalid UTF-8
            let class = std::str::from_utf8(&code[..2]).unwrap().to_owned();
            let index = code[2].checked_sub(b'A')
                .ok_or(ParseFwVersionError::InvalidBuildCode)?;

            (Some(class), Some(index))
        } else {
            (None, None)
        };

        Ok(FwBuildInfo {
            bootloader,
            major,
            year,
            month,
            revision,
        })
    }
}

impl fmt::Display for FwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.pda, self.csc, self.phone, self.data)
    }
}

impl FromStr for FwVersion {
    type Err = ParseFwVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pieces: Vec<&str> = s.split('/').map(str::trim).collect();

        if pieces.len() != 3 && pieces.len() != 4 {
            return Err(ParseFwVersionError::WrongFieldCount(pieces.len()));
        }

        Ok(Self::new(
            pieces[0],
            pieces[1],
            Some(pieces[2]),
            pieces.get(3).copied(),
        ))
    }
}

/// Build metadata decoded from a PDA version component.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FwBuildInfo {
    /// Two-letter bootloader class code, if the code uses the prefix form
    pub bootloader: Option<String>,
    /// Index derived from the third code character (offset from 'A')
    pub major: Option<u8>,
    /// Release year (offset from 'R', base 2018)
    pub year: u16,
    /// Zero-based month index (offset from 'A')
    pub month: u8,
    /// Revision index in the 0-9A-Z alphabet
    pub revision: u8,
}

impl FwBuildInfo {
    /// Date code in the `<year>.<month>` form used by the release listings.
    pub fn date_code(&self) -> String {
        format!("{}.{}", self.year, self.month)
    }
}

#[derive(Debug, Error)]
pub enum ParseFwVersionError {
    #[error("Expected 3 or 4 fields in version string, got {0}")]
    WrongFieldCount(usize),
    #[error("PDA version is too short to carry a build code")]
    BuildCodeTooShort,
    #[error("Build code contains unexpected characters")]
    InvalidBuildCode,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_display() {
        let version = FwVersion::new("a", "b", None, None);
        assert_eq!(version.to_string(), "a/b/a/a");

        let version = FwVersion::new("a", "b", Some("c"), None);
        assert_eq!(version.to_string(), "a/b/c/a");

        let version = FwVersion::new("a", "b", Some("c"), Some("d"));
        assert_eq!(version.to_string(), "a/b/c/d");
    }

    #[test]
    fn test_parse() {
        let result: Result<FwVersion, _> = "a/b/c".parse();
        assert_matches!(result, Ok(x) if x == FwVersion::new("a", "b", Some("c"), None));

        let result: Result<FwVersion, _> = "a/b/c/d".parse();
        assert_matches!(result, Ok(x) if x == FwVersion::new("a", "b", Some("c"), Some("d")));

        let result: Result<FwVersion, _> = "a".parse();
        assert_matches!(result, Err(ParseFwVersionError::WrongFieldCount(1)));

        let result: Result<FwVersion, _> = "a/b".parse();
        assert_matches!(result, Err(ParseFwVersionError::WrongFieldCount(2)));

        let result: Result<FwVersion, _> = "a/b/c/d/e".parse();
        assert_matches!(result, Err(ParseFwVersionError::WrongFieldCount(5)));
    }

    #[test]
    fn test_normalization() {
        // An empty phone component falls back to the PDA component
        let version: FwVersion = "A/B/ ".parse().unwrap();
        assert_eq!(version.to_string(), "A/B/A/A");

        let version: FwVersion = "A/B//D".parse().unwrap();
        assert_eq!(version.to_string(), "A/B/A/D");
    }

    #[test]
    fn test_build_info_prefix_form() {
        let version: FwVersion = "G960FXXU1ASCD/G960FOXM1ASC1/G960FXXU1ASCD".parse().unwrap();

        assert_eq!(version.build_info().unwrap(), FwBuildInfo {
            bootloader: Some("U1".to_owned()),
            major: Some(0),
            year: 2019,
            month: 2,
            revision: 13,
        });
    }

    #[test]
    fn test_build_info_suffix_form() {
        let version: FwVersion = "N950FXXX1ARA5/N950FOXM1ARA5/N950FXXX1ARA5".parse().unwrap();

        let info = version.build_info().unwrap();
        assert_eq!(info, FwBuildInfo {
            bootloader: None,
            major: None,
            year: 2018,
            month: 0,
            revision: 5,
        });
        assert_eq!(info.date_code(), "2018.0");
    }

    #[test]
    fn test_build_info_invalid() {
        let version = FwVersion::new("AB", "x", None, None);
        assert_matches!(version.build_info(),
                        Err(ParseFwVersionError::BuildCodeTooShort));

        let version = FwVersion::new("G960FXXU1AS??", "x", None, None);
        assert_matches!(version.build_info(),
                        Err(ParseFwVersionError::InvalidBuildCode));
    }
}
