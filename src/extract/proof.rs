//! # Proof Bonus
//! Small multiplicative boost for articles carrying verifiable on-chain
//! evidence: an EVM address in the text, or a link to a block scanner.

use once_cell::sync::Lazy;
use regex::Regex;

/// Multiplier when proof signals are present.
pub const PROOF_BONUS: f64 = 1.1;
/// Multiplier otherwise.
pub const NO_PROOF: f64 = 1.0;

static EVM_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"0x[a-fA-F0-9]{40}").expect("valid EVM address regex"));

const SCANNER_DOMAINS: [&str; 5] = [
    "etherscan.io",
    "bscscan.com",
    "polygonscan.com",
    "arbiscan.io",
    "ftmscan.com",
];

/// 1.1 when `content` or `url` carries an on-chain proof signal, else 1.0.
pub fn proof_bonus(content: &str, url: &str) -> f64 {
    if EVM_ADDRESS.is_match(content) || EVM_ADDRESS.is_match(url) {
        return PROOF_BONUS;
    }
    let haystack = format!("{} {}", content.to_ascii_lowercase(), url.to_ascii_lowercase());
    if SCANNER_DOMAINS.iter().any(|d| haystack.contains(d)) {
        return PROOF_BONUS;
    }
    NO_PROOF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_address_in_content_triggers_bonus() {
        let content = "Funds moved to 0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B overnight.";
        assert_eq!(proof_bonus(content, ""), PROOF_BONUS);
    }

    #[test]
    fn scanner_link_triggers_bonus() {
        let content = "See the transaction on Etherscan.io for details.";
        assert_eq!(proof_bonus(content, ""), PROOF_BONUS);
        assert_eq!(proof_bonus("", "https://bscscan.com/tx/0xdead"), PROOF_BONUS);
    }

    #[test]
    fn short_hex_or_plain_text_does_not() {
        assert_eq!(proof_bonus("0x1234 is not an address", ""), NO_PROOF);
        assert_eq!(proof_bonus("no receipts, just vibes", "https://example.com"), NO_PROOF);
    }
}
