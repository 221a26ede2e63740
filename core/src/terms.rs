use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ALPHA: Regex = Regex::new(r"^\p{Alphabetic}+$").expect("valid regex");
}

/// True when every character of `term` is alphabetic (and there is at least one).
pub fn is_alpha(term: &str) -> bool {
    ALPHA.is_match(term)
}

/// Which archive terms become vocabulary columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TermFilter {
    #[default]
    All,
    AlphaOnly,
}

impl TermFilter {
    pub fn from_only_alpha(only_alpha: bool) -> Self {
        if only_alpha {
            TermFilter::AlphaOnly
        } else {
            TermFilter::All
        }
    }

    pub fn admits(self, term: &str) -> bool {
        match self {
            TermFilter::All => true,
            TermFilter::AlphaOnly => is_alpha(term),
        }
    }
}
