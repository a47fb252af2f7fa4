//! Organization leaders: privileged role holders who are copied on, and may
//! moderate, every list their organization owns.

use std::collections::BTreeSet;

use super::store::{Person, Store, PERSON_COLUMNS};
use crate::error::Result;
use crate::model::list::List;

/// Role privilege bit that makes its holders leaders of the role's org.
pub const PRIV_LEADER: i64 = 4;

/// Privileged leaders of every org in `orgs`, deduplicated by address.
pub fn org_leaders(store: &Store, orgs: &BTreeSet<i64>) -> Result<Vec<Person>> {
    let sql = format!(
        "SELECT DISTINCT {PERSON_COLUMNS} FROM person p \
         JOIN person_role pr ON pr.person = p.id \
         JOIN role r ON r.id = pr.role \
         WHERE r.org = ?1 AND (r.privileges & ?2) != 0 \
         ORDER BY p.sort_name"
    );
    let mut seen = BTreeSet::new();
    let mut leaders = Vec::new();
    for org in orgs {
        for person in store.people(&sql, rusqlite::params![org, PRIV_LEADER])? {
            if seen.insert(person.email.to_lowercase()) {
                leaders.push(person);
            }
        }
    }
    Ok(leaders)
}

/// Copy leaders into `bcc` and `moderators`, and wiretaps into `bcc`.
pub fn merge(list: &mut List, leaders: &[Person], wiretap: &[String]) {
    for leader in leaders {
        list.add_bcc(&leader.email, &leader.name);
        list.add_moderator(&leader.email);
    }
    for address in wiretap {
        list.add_bcc(address, "");
    }
}
