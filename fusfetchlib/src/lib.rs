//! Client library for the Samsung firmware update service (FUS).
//!
//! The building blocks are intentionally separable: [`fus::FusClient`] talks
//! the XML-over-HTTP protocol (nonce challenge, catalog, binary-info with
//! identity retry, ranged downloads), [`crypto`] holds the vendor key
//! transforms behind the [`crypto::SessionCrypto`] capability, and
//! [`stream::DownloadStream`] applies block-aligned decryption to the byte
//! stream without buffering the file.

pub mod crypto;
pub mod fus;
pub mod imei;
pub mod range;
pub mod retry;
pub mod stream;
pub mod version;
