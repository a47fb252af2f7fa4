//! Moderation gate: authentication verdicts and sender authorization.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::mime::header::HeaderBlock;
use crate::model::address::EmailAddress;
use crate::model::list::ANYONE;

/// Verdict value meaning the check succeeded.
pub const PASS: &str = "PASS";
/// Verdict value meaning the check was not performed or was inconclusive.
pub const GRAY: &str = "GRAY";
/// Verdict value meaning the check failed.
pub const FAIL: &str = "FAIL";

/// The five inbound verdicts, as recorded in a `V` tracking line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdicts {
    pub dkim: String,
    pub dmarc: String,
    pub spf: String,
    pub spam: String,
    pub virus: String,
}

impl Default for Verdicts {
    fn default() -> Self {
        Self {
            dkim: GRAY.into(),
            dmarc: GRAY.into(),
            spf: GRAY.into(),
            spam: GRAY.into(),
            virus: GRAY.into(),
        }
    }
}

impl Verdicts {
    /// All checks passed.
    pub fn passing() -> Self {
        Self {
            dkim: PASS.into(),
            dmarc: PASS.into(),
            spf: PASS.into(),
            spam: PASS.into(),
            virus: PASS.into(),
        }
    }

    /// Derive verdicts from the receiving MTA's annotations:
    /// `X-SES-Spam-Verdict`, `X-SES-Virus-Verdict` and the `dkim=`, `spf=`,
    /// `dmarc=` results of `Authentication-Results`.
    pub fn from_headers(header: &HeaderBlock) -> Self {
        let mut verdicts = Self::default();
        if let Some(v) = header.get("x-ses-spam-verdict") {
            verdicts.spam = normalize(&v);
        }
        if let Some(v) = header.get("x-ses-virus-verdict") {
            verdicts.virus = normalize(&v);
        }
        for results in header.get_all("authentication-results") {
            for clause in results.split(';') {
                let Some((method, rest)) = clause.trim().split_once('=') else {
                    continue;
                };
                let result = rest.split_whitespace().next().unwrap_or("");
                match method.trim().to_ascii_lowercase().as_str() {
                    "dkim" => verdicts.dkim = normalize(result),
                    "spf" => verdicts.spf = normalize(result),
                    "dmarc" => verdicts.dmarc = normalize(result),
                    _ => {}
                }
            }
        }
        verdicts
    }

    /// Values in `V` record order.
    pub fn to_array(&self) -> [&str; 5] {
        [&self.dkim, &self.dmarc, &self.spf, &self.spam, &self.virus]
    }
}

impl fmt::Display for Verdicts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dkim={} dmarc={} spf={} spam={} virus={}",
            self.dkim, self.dmarc, self.spf, self.spam, self.virus
        )
    }
}

/// Map a raw result token to `PASS`, `FAIL`, `GRAY` or its uppercase form.
fn normalize(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "pass" => PASS.into(),
        "fail" => FAIL.into(),
        "" | "none" | "neutral" | "gray" => GRAY.into(),
        other => other.to_ascii_uppercase(),
    }
}

/// Decide whether a message must be held.
///
/// DKIM, DMARC and SPF must be `PASS` or `GRAY`; spam and virus must be
/// `PASS`. Unless `senders` contains [`ANYONE`], the `From` address must be
/// in `senders`. Returns the decision and the reasons, one sentence each.
pub fn needs_moderation(
    verdicts: &Verdicts,
    senders: &BTreeSet<String>,
    from_header: Option<&str>,
) -> (bool, Vec<String>) {
    let mut reasons = Vec::new();

    for (name, value) in [
        ("DKIM", &verdicts.dkim),
        ("DMARC", &verdicts.dmarc),
        ("SPF", &verdicts.spf),
    ] {
        if value != PASS && value != GRAY {
            reasons.push(format!("The {name} verdict is {value}."));
        }
    }
    for (name, value) in [("spam", &verdicts.spam), ("virus", &verdicts.virus)] {
        if value != PASS {
            reasons.push(format!("The {name} verdict is {value}."));
        }
    }

    if !senders.contains(ANYONE) {
        match from_header.and_then(EmailAddress::parse) {
            None => reasons.push("The From: address could not be parsed.".to_string()),
            Some(from) if !senders.contains(&from.canonical()) => reasons.push(format!(
                "{} is not authorized to send to this list.",
                from.address
            )),
            Some(_) => {}
        }
    }

    (!reasons.is_empty(), reasons)
}
