//! Email address parsing (RFC 5322 §3.4) and case folding.

/// A parsed email address.
///
/// `"Pat Member <Pat@Example.org>"` keeps `address` as written
/// (`Pat@Example.org`); compare with [`EmailAddress::canonical`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address as written (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single address from an (already RFC 2047-decoded) header value.
    ///
    /// Returns `None` when no `local@domain` can be found.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        // "Display Name <address>" or "<address>"
        let parsed = match (trimmed.rfind('<'), trimmed.rfind('>')) {
            (Some(open), Some(close)) if close > open => Self {
                display_name: strip_quotes(&trimmed[..open]),
                address: trimmed[open + 1..close].trim().to_string(),
            },
            _ => Self {
                display_name: String::new(),
                address: strip_comment(trimmed).to_string(),
            },
        };

        parsed.is_valid().then_some(parsed)
    }

    /// Parse a comma-separated list of addresses, skipping unparseable entries.
    ///
    /// Handles quoted commas: `"Last, First" <a@b.com>, other@c.com`
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        for ch in raw.chars() {
            match ch {
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '<' if !in_quotes => {
                    in_angle = true;
                    current.push(ch);
                }
                '>' if !in_quotes => {
                    in_angle = false;
                    current.push(ch);
                }
                ',' if !in_quotes && !in_angle => {
                    results.extend(Self::parse(&current));
                    current.clear();
                }
                _ => current.push(ch),
            }
        }
        results.extend(Self::parse(&current));
        results
    }

    /// Lowercased address, the key used for every set and map lookup.
    pub fn canonical(&self) -> String {
        self.address.to_lowercase()
    }

    /// Local part and domain, split at the last `@`.
    pub fn parts(&self) -> Option<(&str, &str)> {
        let at = self.address.rfind('@')?;
        Some((&self.address[..at], &self.address[at + 1..]))
    }

    /// `true` if the address has a non-empty local part and a dotted or bare
    /// domain without whitespace.
    pub fn is_valid(&self) -> bool {
        match self.parts() {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !self.address.chars().any(char::is_whitespace)
            }
            None => false,
        }
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Lowercase an address for set membership.
pub fn canonical(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Drop a trailing `(comment)` from a bare address: `a@b.com (Alice)`.
fn strip_comment(s: &str) -> &str {
    match s.find('(') {
        Some(pos) => s[..pos].trim(),
        None => s,
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
