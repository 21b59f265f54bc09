use rand::Rng;

use crate::fus::FusError;

/// Digit distributions observed in real serial numbers. Candidates drawn
/// from these pass the service's identity screening far more often than
/// uniformly random ones.
const SERIAL_FIRST: [u8; 3] = [0, 5, 7];
const SERIAL_THIRD: [u8; 6] = [0, 1, 3, 5, 6, 7];

/// Compute the Luhn check digit for a string of ASCII digits.
pub fn luhn_check_digit(body: &str) -> u8 {
    let parity = (body.len() + 1) % 2;
    let sum: u32 = body.bytes()
        .chain(std::iter::once(b'0'))
        .enumerate()
        .map(|(i, b)| {
            let mut digit = u32::from(b - b'0');
            if i % 2 == parity {
                digit *= 2;
                if digit > 9 {
                    digit -= 9;
                }
            }
            digit
        })
        .sum();

    ((10 - sum % 10) % 10) as u8
}

/// Generate a pseudo-random device identity from an 8-digit TAC: the TAC, a
/// 6-digit serial drawn from the observed distributions, and a Luhn check
/// digit.
pub fn generate_imei(tac: &str) -> String {
    let mut rng = rand::thread_rng();

    let body = format!(
        "{}{}{}{}{}{:02}",
        tac,
        SERIAL_FIRST[rng.gen_range(0..SERIAL_FIRST.len())],
        rng.gen_range(4..=9),
        SERIAL_THIRD[rng.gen_range(0..SERIAL_THIRD.len())],
        rng.gen_range(0..=9),
        rng.gen_range(0..=99),
    );

    format!("{}{}", body, luhn_check_digit(&body))
}

/// Where the device identity for binary-info requests comes from.
///
/// A full caller-supplied identity is replayed on every attempt; a TAC
/// yields a fresh generated candidate per attempt. The selected identity
/// always flows as an explicit value, never through shared state.
#[derive(Clone, Debug)]
pub enum ImeiSource {
    /// Caller-supplied 15-digit identity
    Fixed(String),
    /// 8-digit type allocation code used to seed generated candidates
    Tac(String),
}

impl ImeiSource {
    /// Classify caller input: a 15-digit value is used verbatim and an
    /// 8-digit value is treated as a TAC. Anything else is rejected.
    pub fn from_input(input: &str) -> Result<Self, FusError> {
        let input = input.trim();

        if !input.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FusError::InvalidIdentity(input.to_owned()));
        }

        match input.len() {
            15 => Ok(Self::Fixed(input.to_owned())),
            8 => Ok(Self::Tac(input.to_owned())),
            _ => Err(FusError::InvalidIdentity(input.to_owned())),
        }
    }

    /// Identity to submit for the next attempt.
    pub fn candidate(&self) -> String {
        match self {
            Self::Fixed(imei) => imei.clone(),
            Self::Tac(tac) => generate_imei(tac),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_luhn_check_digit() {
        // 490154203237518 is the canonical valid example identity
        assert_eq!(luhn_check_digit("49015420323751"), 8);
        assert_eq!(luhn_check_digit("35439911053293"), 2);
    }

    #[test]
    fn test_generate_imei() {
        for _ in 0..100 {
            let imei = generate_imei("35439911");

            assert_eq!(imei.len(), 15);
            assert!(imei.starts_with("35439911"));
            assert!(imei.bytes().all(|b| b.is_ascii_digit()));

            let (body, check) = imei.split_at(14);
            assert_eq!(luhn_check_digit(body).to_string(), check);
        }
    }

    #[test]
    fn test_from_input() {
        assert_matches!(ImeiSource::from_input("490154203237518"),
                        Ok(ImeiSource::Fixed(x)) if x == "490154203237518");
        assert_matches!(ImeiSource::from_input("35439911"),
                        Ok(ImeiSource::Tac(x)) if x == "35439911");
        assert_matches!(ImeiSource::from_input("1234"),
                        Err(FusError::InvalidIdentity(_)));
        assert_matches!(ImeiSource::from_input("49015420323751x"),
                        Err(FusError::InvalidIdentity(_)));
    }

    #[test]
    fn test_candidate() {
        let source = ImeiSource::Fixed("490154203237518".to_owned());
        assert_eq!(source.candidate(), "490154203237518");
        assert_eq!(source.candidate(), "490154203237518");

        let source = ImeiSource::Tac("35439911".to_owned());
        assert_eq!(source.candidate().len(), 15);
    }
}
