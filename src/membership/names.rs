// src/membership/names.rs
//! Display-name resolution tiers for a group member.

use once_cell::sync::OnceCell;
use regex::Regex;

use super::contacts::ContactCache;
use super::normalize::GroupMember;
use crate::merge::{is_placeholder, placeholder_for};
use crate::store::NameSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: String,
    pub source: NameSource,
}

/// Trim and collapse whitespace. Empty strings and names that are really a
/// phone number or a placeholder count as no name at all.
pub fn clean_name(raw: &str) -> Option<String> {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    let out = re_ws.replace_all(raw.trim(), " ").to_string();
    if out.is_empty() || is_placeholder(&out) {
        None
    } else {
        Some(out)
    }
}

/// Tiers 1-3: names carried by the roster payload itself.
pub fn embedded_name(member: &GroupMember) -> Option<ResolvedName> {
    let n = &member.candidate_names;
    [
        (n.profile_name.as_ref(), NameSource::GroupMetadataPushName),
        (n.contact_name.as_ref(), NameSource::GroupMetadataName),
        (n.notify_name.as_ref(), NameSource::GroupMetadataNotify),
    ]
    .into_iter()
    .find_map(|(name, source)| {
        name.map(|name| ResolvedName {
            name: name.clone(),
            source,
        })
    })
}

/// All five tiers; the contact cache must already hold the lookups for
/// members without an embedded name.
pub fn resolve_name(member: &GroupMember, contacts: &ContactCache) -> ResolvedName {
    if let Some(r) = embedded_name(member) {
        return r;
    }
    if let Some(name) = contacts.get(&member.phone) {
        return ResolvedName {
            name: name.to_string(),
            source: NameSource::ContactsApi,
        };
    }
    ResolvedName {
        name: placeholder_for(&member.phone),
        source: NameSource::Placeholder,
    }
}
