//! Role lists: `role-<id>` holders, optionally filtered by credentials.
//!
//! Criteria follow the role ID, each introduced by `+` or `-`, and may be
//! negated with a `no` prefix: `role-42-bgcheck+nocardkey`.

use std::collections::BTreeSet;

use rusqlite::OptionalExtension;
use thiserror::Error;
use tracing::warn;

use super::leaders::org_leaders;
use super::store::{Store, PERSON_COLUMNS};
use super::{ListKind, Resolved};
use crate::error::Result;
use crate::model::list::List;

/// A credential a role list can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Criterion {
    BgCheck,
    CardKey,
    DswCert,
    DswComm,
    PhotoId,
    VolReg,
}

impl Criterion {
    fn from_name(s: &str) -> Option<Self> {
        match s {
            "bgcheck" => Some(Self::BgCheck),
            "cardkey" => Some(Self::CardKey),
            "dswcert" => Some(Self::DswCert),
            "dswcomm" => Some(Self::DswComm),
            "photoid" => Some(Self::PhotoId),
            "volreg" => Some(Self::VolReg),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::BgCheck => "background check",
            Self::CardKey => "card key",
            Self::DswCert => "DSW CERT registration",
            Self::DswComm => "DSW Communications registration",
            Self::PhotoId => "photo ID",
            Self::VolReg => "volunteer registration",
        }
    }

    /// SQL predicate on `person p` that holds when the person has the
    /// credential. Date-based credentials compare against `?2`.
    fn predicate(self) -> &'static str {
        match self {
            Self::BgCheck => {
                "EXISTS (SELECT 1 FROM person_bgcheck b WHERE b.person = p.id \
                 AND b.cleared IS NOT NULL AND b.nli IS NULL)"
            }
            Self::CardKey => "COALESCE(p.card_key, 0) != 0",
            Self::PhotoId => "COALESCE(p.photo_id, 0) != 0",
            Self::DswCert => "COALESCE(p.dsw_cert_expires, '') >= ?2",
            Self::DswComm => "COALESCE(p.dsw_comm_expires, '') >= ?2",
            Self::VolReg => "COALESCE(p.volreg_expires, '') >= ?2",
        }
    }

    fn uses_date(self) -> bool {
        matches!(self, Self::DswCert | Self::DswComm | Self::VolReg)
    }
}

/// Why a role list name was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CriteriaError {
    #[error("unknown criterion '{0}'")]
    Unknown(String),

    #[error("criterion '{0}' given more than once")]
    Duplicate(String),

    #[error("criterion '{0}' both required and excluded")]
    Conflicting(String),
}

/// A parsed role list name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleQuery {
    pub role: i64,
    /// `(criterion, required)` in the order given.
    pub criteria: Vec<(Criterion, bool)>,
}

impl RoleQuery {
    /// `None` if `name` is not a role list name at all.
    pub fn parse(name: &str) -> Option<std::result::Result<Self, CriteriaError>> {
        let rest = name.strip_prefix("role-")?;
        let id_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        if id_len == 0 {
            return None;
        }
        let role: i64 = rest[..id_len].parse().ok()?;
        let tail = &rest[id_len..];
        if !tail.is_empty() && !tail.starts_with(['+', '-']) {
            return None;
        }
        Some(Self::parse_criteria(role, tail))
    }

    fn parse_criteria(role: i64, tail: &str) -> std::result::Result<Self, CriteriaError> {
        let mut criteria: Vec<(Criterion, bool)> = Vec::new();
        for token in tail.split(['+', '-']).skip(1) {
            let (crit_name, required) = match token.strip_prefix("no") {
                Some(rest) if Criterion::from_name(rest).is_some() => (rest, false),
                _ => (token, true),
            };
            let criterion = Criterion::from_name(crit_name)
                .ok_or_else(|| CriteriaError::Unknown(token.to_string()))?;
            match criteria.iter().find(|(c, _)| *c == criterion) {
                Some((_, prev)) if *prev == required => {
                    return Err(CriteriaError::Duplicate(crit_name.to_string()))
                }
                Some(_) => return Err(CriteriaError::Conflicting(crit_name.to_string())),
                None => criteria.push((criterion, required)),
            }
        }
        Ok(Self { role, criteria })
    }

    fn uses_date(&self) -> bool {
        self.criteria.iter().any(|(c, _)| c.uses_date())
    }

    /// Member query for this role and its criteria.
    fn sql(&self) -> String {
        let mut sql = format!(
            "SELECT DISTINCT {PERSON_COLUMNS} FROM person p \
             JOIN person_role pr ON pr.person = p.id WHERE pr.role = ?1"
        );
        for (criterion, required) in &self.criteria {
            if *required {
                sql.push_str(&format!(" AND {}", criterion.predicate()));
            } else {
                sql.push_str(&format!(" AND NOT {}", criterion.predicate()));
            }
        }
        sql.push_str(" ORDER BY p.sort_name");
        sql
    }

    /// "because they are a Team Lead with background check, without card key"
    fn reason(&self, title: &str) -> String {
        let mut reason = format!("because they are a {title}");
        let clauses: Vec<String> = self
            .criteria
            .iter()
            .map(|(c, required)| {
                let with = if *required { "with" } else { "without" };
                format!("{with} {}", c.label())
            })
            .collect();
        if !clauses.is_empty() {
            reason.push(' ');
            reason.push_str(&clauses.join(", "));
        }
        reason
    }
}

/// Lists of role holders.
#[derive(Debug, Default)]
pub struct RoleLists;

impl ListKind for RoleLists {
    fn kind(&self) -> &'static str {
        "role"
    }

    fn resolve(&self, store: &Store, name: &str) -> Result<Option<Resolved>> {
        let query = match RoleQuery::parse(name) {
            None => return Ok(None),
            Some(Ok(query)) => query,
            Some(Err(e)) => {
                warn!(list = %name, error = %e, "Invalid role list criteria");
                return Ok(None);
            }
        };

        let role = store
            .conn()
            .query_row(
                "SELECT name, title, org FROM role WHERE id = ?1",
                [query.role],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((role_name, title, org)) = role else {
            return Ok(None);
        };
        let title = title.filter(|t| !t.trim().is_empty()).unwrap_or(role_name);

        let mut list = List::new(name, title.as_str());
        list.reason = query.reason(&title);

        let sql = query.sql();
        let members = if query.uses_date() {
            store.people(&sql, rusqlite::params![query.role, store.today()])?
        } else {
            store.people(&sql, [query.role])?
        };
        for person in members {
            list.add_recipient(&person.email, &person.name, &person.token);
        }

        let orgs: BTreeSet<i64> = org.into_iter().collect();
        for leader in org_leaders(store, &orgs)? {
            list.add_sender(&leader.email);
        }
        Ok(Some(Resolved { list, orgs }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str) -> Option<std::result::Result<RoleQuery, CriteriaError>> {
        RoleQuery::parse(name)
    }

    #[test]
    fn test_plain_role() {
        let q = parse("role-42").unwrap().unwrap();
        assert_eq!(q.role, 42);
        assert!(q.criteria.is_empty());
        assert_eq!(q.reason("Team Lead"), "because they are a Team Lead");
    }

    #[test]
    fn test_criteria_and_negation() {
        let q = parse("role-42-bgcheck+nocardkey").unwrap().unwrap();
        assert_eq!(
            q.criteria,
            vec![(Criterion::BgCheck, true), (Criterion::CardKey, false)]
        );
        assert_eq!(
            q.reason("Team Lead"),
            "because they are a Team Lead with background check, without card key"
        );
        assert!(!q.uses_date());
        assert!(parse("role-1+volreg").unwrap().unwrap().uses_date());
    }

    #[test]
    fn test_not_a_role_name() {
        assert!(parse("role-").is_none());
        assert!(parse("role-x").is_none());
        assert!(parse("role-42x").is_none());
        assert!(parse("roles-42").is_none());
    }

    #[test]
    fn test_invalid_criteria() {
        assert_eq!(
            parse("role-42-bogus").unwrap(),
            Err(CriteriaError::Unknown("bogus".into()))
        );
        assert_eq!(
            parse("role-42-bgcheck+bgcheck").unwrap(),
            Err(CriteriaError::Duplicate("bgcheck".into()))
        );
        assert_eq!(
            parse("role-42-photoid-nophotoid").unwrap(),
            Err(CriteriaError::Conflicting("photoid".into()))
        );
        assert_eq!(
            parse("role-42-").unwrap(),
            Err(CriteriaError::Unknown("".into()))
        );
    }

    #[test]
    fn test_sql_binds_date_only_when_needed() {
        let q = parse("role-3-bgcheck").unwrap().unwrap();
        assert!(!q.sql().contains("?2"));
        let q = parse("role-3-nodswcert").unwrap().unwrap();
        assert!(q.sql().contains("AND NOT COALESCE(p.dsw_cert_expires, '') >= ?2"));
    }
}
