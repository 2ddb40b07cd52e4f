//! Live translation bridge: protocol, transport, transcript, session.

pub mod protocol;
pub mod session;
pub mod transcript;
pub mod transport;

use serde::{Deserialize, Serialize};

/// Language spoken by the merchant side of the conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellerLanguage {
    Urdu,
    Pashto,
    Punjabi,
    Sindhi,
    Balochi,
}

impl SellerLanguage {
    pub fn display_name(&self) -> &'static str {
        match self {
            SellerLanguage::Urdu => "Urdu",
            SellerLanguage::Pashto => "Pashto",
            SellerLanguage::Punjabi => "Punjabi",
            SellerLanguage::Sindhi => "Sindhi",
            SellerLanguage::Balochi => "Balochi",
        }
    }

    pub fn all() -> &'static [SellerLanguage] {
        &[
            SellerLanguage::Urdu,
            SellerLanguage::Pashto,
            SellerLanguage::Punjabi,
            SellerLanguage::Sindhi,
            SellerLanguage::Balochi,
        ]
    }

    pub fn from_name(name: &str) -> Option<SellerLanguage> {
        Self::all()
            .iter()
            .copied()
            .find(|l| l.display_name().eq_ignore_ascii_case(name.trim()))
    }
}

impl Default for SellerLanguage {
    fn default() -> Self {
        SellerLanguage::Urdu
    }
}

/// Which side of the conversation a piece of transcript belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Traveler,
    Seller,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_lookup_is_case_insensitive() {
        assert_eq!(SellerLanguage::from_name("urdu"), Some(SellerLanguage::Urdu));
        assert_eq!(
            SellerLanguage::from_name("  PASHTO "),
            Some(SellerLanguage::Pashto)
        );
        assert_eq!(SellerLanguage::from_name("klingon"), None);
    }
}
