use crate::imei::ImeiSource;

/// Maximum number of device identities tried per binary-info lookup.
pub const MAX_IDENTITY_ATTEMPTS: u32 = 5;

/// Protocol-level verdict for one binary-info attempt, derived from the
/// `Results.Status` field of the response (not the HTTP status).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptVerdict {
    /// Status 200: the identity was accepted and metadata is available.
    Accepted,
    /// Status 408: the candidate identity was rejected; another one may be
    /// tried.
    IdentityRejected,
    /// Status 401: the session credentials were rejected. Not recoverable
    /// by switching identities.
    Unauthorized,
    /// Any other status. Fails the lookup immediately.
    Fatal(u16),
}

pub fn classify_status(status: u16) -> AttemptVerdict {
    match status {
        200 => AttemptVerdict::Accepted,
        408 => AttemptVerdict::IdentityRejected,
        401 => AttemptVerdict::Unauthorized,
        other => AttemptVerdict::Fatal(other),
    }
}

/// Sequential identity selection for the binary-info retry loop, bounded at
/// [`MAX_IDENTITY_ATTEMPTS`]. Attempts are strictly ordered; the caller
/// drives one attempt to completion before asking for the next identity.
#[derive(Debug)]
pub struct IdentityRetry {
    source: ImeiSource,
    attempt: u32,
}

impl IdentityRetry {
    pub fn new(source: ImeiSource) -> Self {
        Self {
            source,
            attempt: 0,
        }
    }

    /// The attempt number and identity to use for the next attempt, or None
    /// once the attempt budget is exhausted.
    pub fn next_identity(&mut self) -> Option<(u32, String)> {
        if self.attempt >= MAX_IDENTITY_ATTEMPTS {
            return None;
        }

        self.attempt += 1;
        Some((self.attempt, self.source.candidate()))
    }

    /// Number of attempts handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), AttemptVerdict::Accepted);
        assert_eq!(classify_status(408), AttemptVerdict::IdentityRejected);
        assert_eq!(classify_status(401), AttemptVerdict::Unauthorized);
        assert_eq!(classify_status(500), AttemptVerdict::Fatal(500));
        assert_eq!(classify_status(404), AttemptVerdict::Fatal(404));
    }

    #[test]
    fn test_attempt_budget() {
        // A server that keeps answering 408 gets exactly 5 attempts
        let mut retry = IdentityRetry::new(ImeiSource::Fixed("490154203237518".to_owned()));
        let mut identities = vec![];

        while let Some((attempt, imei)) = retry.next_identity() {
            assert_eq!(attempt as usize, identities.len() + 1);
            identities.push(imei);
        }

        assert_eq!(identities.len(), MAX_IDENTITY_ATTEMPTS as usize);
        assert_matches!(retry.next_identity(), None);

        // A fixed identity is replayed on every attempt
        assert!(identities.iter().all(|i| i == "490154203237518"));
    }

    #[test]
    fn test_first_attempt_success() {
        // A server that answers 200 immediately causes exactly one attempt
        let mut retry = IdentityRetry::new(ImeiSource::Fixed("490154203237518".to_owned()));

        let (attempt, _) = retry.next_identity().unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(classify_status(200), AttemptVerdict::Accepted);
        assert_eq!(retry.attempts(), 1);
    }

    #[test]
    fn test_generated_identities() {
        let mut retry = IdentityRetry::new(ImeiSource::Tac("35439911".to_owned()));

        while let Some((_, imei)) = retry.next_identity() {
            assert_eq!(imei.len(), 15);
            assert!(imei.starts_with("35439911"));
        }

        assert_eq!(retry.attempts(), MAX_IDENTITY_ATTEMPTS);
    }
}
