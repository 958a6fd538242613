//! Network-specific address pattern checks.
//!
//! These are shape checks only (charset, prefix, length) — enough to
//! reject obvious typos and cross-network mistakes before a withdrawal
//! address is registered. Whether a (currency, network) pair is valid
//! at all is the currency table's decision, not this module's.

use super::Network;

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BECH32: &str = "acdefghjklmnpqrstuvwxyz023456789";

/// Does `address` look like a valid address on `network`?
pub fn matches_network(network: Network, address: &str) -> bool {
    match network {
        Network::Bitcoin => is_btc_base58(address) || is_btc_bech32(address),
        Network::Lightning => is_lightning(address),
        Network::Ethereum
        | Network::Arbitrum
        | Network::Optimism
        | Network::Bsc
        | Network::Polygon => is_evm_hex(address),
        Network::Tron => is_tron(address),
        Network::Solana => is_solana(address),
    }
}

fn is_base58(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| BASE58.contains(c))
}

/// Legacy / P2SH: `1...` or `3...`, 26–35 base58 chars total.
fn is_btc_base58(address: &str) -> bool {
    let mut chars = address.chars();
    matches!(chars.next(), Some('1' | '3'))
        && (26..=35).contains(&address.len())
        && is_base58(&address[1..])
}

/// Native segwit: `bc1` followed by 11–71 bech32 chars.
fn is_btc_bech32(address: &str) -> bool {
    let Some(rest) = address.strip_prefix("bc1") else {
        return false;
    };
    (11..=71).contains(&rest.len()) && rest.chars().all(|c| BECH32.contains(c))
}

/// BOLT-11 invoice: `ln` prefix, lower-case alphanumerics.
fn is_lightning(address: &str) -> bool {
    let Some(rest) = address.strip_prefix("ln") else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// `0x` plus 40 hex digits.
fn is_evm_hex(address: &str) -> bool {
    let Some(rest) = address.strip_prefix("0x") else {
        return false;
    };
    rest.len() == 40 && rest.chars().all(|c| c.is_ascii_hexdigit())
}

/// `T` plus 33 base58 chars.
fn is_tron(address: &str) -> bool {
    let Some(rest) = address.strip_prefix('T') else {
        return false;
    };
    rest.len() == 33 && is_base58(rest)
}

/// 32–44 base58 chars.
fn is_solana(address: &str) -> bool {
    (32..=44).contains(&address.len()) && is_base58(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_wellformed_addresses() {
        assert!(matches_network(
            Network::Bitcoin,
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"
        ));
        assert!(matches_network(
            Network::Bitcoin,
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"
        ));
        assert!(matches_network(
            Network::Ethereum,
            "0x52908400098527886E0F7030069857D2E4169EE7"
        ));
        assert!(matches_network(
            Network::Tron,
            "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8"
        ));
        assert!(matches_network(
            Network::Solana,
            "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T"
        ));
        assert!(matches_network(Network::Lightning, "lnbc20m1pvjluez"));
    }

    #[test]
    fn rejects_cross_network_addresses() {
        // EVM address on bitcoin and vice versa.
        assert!(!matches_network(
            Network::Bitcoin,
            "0x52908400098527886E0F7030069857D2E4169EE7"
        ));
        assert!(!matches_network(
            Network::Ethereum,
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"
        ));
        // Tron address on solana passes base58 but starts with T and is 34 chars;
        // length range happens to overlap, so check a too-short one instead.
        assert!(!matches_network(Network::Solana, "tooshort"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!matches_network(Network::Ethereum, "0x123"));
        assert!(!matches_network(Network::Ethereum, "0xZZ08400098527886E0F7030069857D2E4169EE7Z"));
        assert!(!matches_network(Network::Bitcoin, ""));
        assert!(!matches_network(Network::Bitcoin, "2NotAValidPrefix11111111111111"));
        // Base58 excludes 0, O, I, l.
        assert!(!matches_network(Network::Tron, "T0000000000000000000000000000000000"));
        assert!(!matches_network(Network::Lightning, "payme"));
    }
}
