pub mod account;
pub mod address;
pub mod transaction;

use serde::{Deserialize, Serialize};

/// Supported deposit/withdrawal currencies.
///
/// Which networks a currency settles on, its token conversion rate, and
/// its limits live in [`crate::config::CurrencyTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "USDT")]
    Usdt,
    #[serde(rename = "USDC")]
    Usdc,
    #[serde(rename = "MATIC")]
    Matic,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
            Currency::Usdt => "USDT",
            Currency::Usdc => "USDC",
            Currency::Matic => "MATIC",
        }
    }

    /// Parse a wire-level currency code. Case-sensitive on purpose: the
    /// provider always sends upper-case codes.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "BTC" => Some(Currency::Btc),
            "ETH" => Some(Currency::Eth),
            "USDT" => Some(Currency::Usdt),
            "USDC" => Some(Currency::Usdc),
            "MATIC" => Some(Currency::Matic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Settlement networks across all supported currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Bitcoin,
    Lightning,
    Ethereum,
    Arbitrum,
    Optimism,
    Tron,
    Bsc,
    Polygon,
    Solana,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::Lightning => "lightning",
            Network::Ethereum => "ethereum",
            Network::Arbitrum => "arbitrum",
            Network::Optimism => "optimism",
            Network::Tron => "tron",
            Network::Bsc => "bsc",
            Network::Polygon => "polygon",
            Network::Solana => "solana",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "bitcoin" => Some(Network::Bitcoin),
            "lightning" => Some(Network::Lightning),
            "ethereum" => Some(Network::Ethereum),
            "arbitrum" => Some(Network::Arbitrum),
            "optimism" => Some(Network::Optimism),
            "tron" => Some(Network::Tron),
            "bsc" => Some(Network::Bsc),
            "polygon" => Some(Network::Polygon),
            "solana" => Some(Network::Solana),
            _ => None,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Transaction direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxType {
    Deposit,
    Withdrawal,
    Refund,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Withdrawal => "withdrawal",
            TxType::Refund => "refund",
        }
    }
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction lifecycle status.
///
/// Transitions only ever go `Pending` → one of the terminal states;
/// the store's compare-and-set enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
            TxStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
