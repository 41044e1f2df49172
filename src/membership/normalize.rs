// src/membership/normalize.rs
//! Roster payload normalization. The gateway returns participants in more
//! than one shape depending on endpoint version; everything is reduced here
//! to one canonical digits-only phone before any comparison or storage.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::names::clean_name;

/// Digits accepted as a phone (E.164 allows at most 15).
const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 8..=15;

/// JID domains that never carry a phone number.
const NON_PHONE_DOMAINS: [&str; 4] = ["lid", "g.us", "broadcast", "newsletter"];

/// Participant as returned by the gateway, any shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParticipant {
    #[serde(default)]
    pub id: Option<ParticipantId>,
    /// Modern rosters: "5511...@s.whatsapp.net" next to a linked-device id.
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub jid: Option<String>,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParticipantId {
    /// "5511999998888@s.whatsapp.net"
    Jid(String),
    /// `{ "server": "c.us", "user": "5511999998888", "_serialized": "...@c.us" }`
    Legacy(LegacyId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyId {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default, rename = "_serialized")]
    pub serialized: Option<String>,
}

/// Roster-embedded names, already cleaned (empty and phone-like dropped).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateNames {
    pub profile_name: Option<String>,
    pub contact_name: Option<String>,
    pub notify_name: Option<String>,
}

impl CandidateNames {
    /// Fill gaps from another sighting of the same phone.
    fn absorb(&mut self, other: CandidateNames) {
        if self.profile_name.is_none() {
            self.profile_name = other.profile_name;
        }
        if self.contact_name.is_none() {
            self.contact_name = other.contact_name;
        }
        if self.notify_name.is_none() {
            self.notify_name = other.notify_name;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.profile_name.is_none() && self.contact_name.is_none() && self.notify_name.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub phone: String,
    pub candidate_names: CandidateNames,
}

/// Reduce one identifier ("phone@domain", "phone:device@domain", bare
/// digits, "+55 11 ...") to canonical digits. `None` when it is not a phone.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let local = match raw.split_once('@') {
        Some((_, domain)) if NON_PHONE_DOMAINS.contains(&domain.to_ascii_lowercase().as_str()) => {
            return None
        }
        Some((local, _)) => local,
        None => raw,
    };
    let local = local.split(':').next().unwrap_or(local);
    let digits: String = local.chars().filter(|c| c.is_ascii_digit()).collect();
    PHONE_DIGITS.contains(&digits.len()).then_some(digits)
}

/// Canonical phone of a participant, trying each field in priority order:
/// `phoneNumber`, `jid`, string `id`, legacy `id.user`, legacy `id._serialized`.
pub fn participant_phone(p: &RawParticipant) -> Option<String> {
    let mut candidates: Vec<&str> = Vec::with_capacity(5);
    if let Some(s) = p.phone_number.as_deref() {
        candidates.push(s);
    }
    if let Some(s) = p.jid.as_deref() {
        candidates.push(s);
    }
    match &p.id {
        Some(ParticipantId::Jid(s)) => candidates.push(s),
        Some(ParticipantId::Legacy(l)) => {
            let lid = l
                .server
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("lid"));
            if let Some(u) = l.user.as_deref().filter(|_| !lid) {
                candidates.push(u);
            }
            if let Some(s) = l.serialized.as_deref() {
                candidates.push(s);
            }
        }
        None => {}
    }
    candidates.into_iter().find_map(normalize_phone)
}

fn candidate_names(p: &RawParticipant) -> CandidateNames {
    CandidateNames {
        profile_name: p.push_name.as_deref().and_then(clean_name),
        contact_name: p.name.as_deref().and_then(clean_name),
        notify_name: p.notify.as_deref().and_then(clean_name),
    }
}

/// Normalize a roster into members deduplicated by phone, roster order kept.
/// Returns the members and how many participants carried no usable phone.
pub fn to_members(raw: Vec<RawParticipant>) -> (Vec<GroupMember>, usize) {
    let mut members: Vec<GroupMember> = Vec::with_capacity(raw.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(raw.len());
    let mut skipped = 0usize;

    for p in raw {
        let Some(phone) = participant_phone(&p) else {
            tracing::warn!(target: "membership", participant = ?p.id, "participant without usable phone skipped");
            skipped += 1;
            continue;
        };
        let names = candidate_names(&p);
        match index.get(&phone) {
            Some(&i) => members[i].candidate_names.absorb(names),
            None => {
                index.insert(phone.clone(), members.len());
                members.push(GroupMember {
                    phone,
                    candidate_names: names,
                });
            }
        }
    }
    (members, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_identifier_forms() {
        assert_eq!(
            normalize_phone("5511999998888@s.whatsapp.net").as_deref(),
            Some("5511999998888")
        );
        assert_eq!(
            normalize_phone("5511999998888:12@s.whatsapp.net").as_deref(),
            Some("5511999998888")
        );
        assert_eq!(normalize_phone("5511999998888@c.us").as_deref(), Some("5511999998888"));
        assert_eq!(normalize_phone("+55 (11) 99999-8888").as_deref(), Some("5511999998888"));
    }

    #[test]
    fn rejects_non_phone_identifiers() {
        assert_eq!(normalize_phone("123456789012345@lid"), None);
        assert_eq!(normalize_phone("120363000000000000@g.us"), None);
        assert_eq!(normalize_phone("1234"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn lid_participant_uses_phone_number_field() {
        let p: RawParticipant = serde_json::from_value(serde_json::json!({
            "id": "98765432109876@lid",
            "phoneNumber": "5511977776666@s.whatsapp.net",
            "admin": null
        }))
        .unwrap();
        assert_eq!(participant_phone(&p).as_deref(), Some("5511977776666"));
    }

    #[test]
    fn legacy_lid_server_is_not_a_phone() {
        let p: RawParticipant = serde_json::from_value(serde_json::json!({
            "id": { "server": "lid", "user": "98765432109876", "_serialized": "98765432109876@lid" }
        }))
        .unwrap();
        assert_eq!(participant_phone(&p), None);
    }

    #[test]
    fn duplicate_sightings_merge_names() {
        let raw: Vec<RawParticipant> = serde_json::from_value(serde_json::json!([
            { "id": "5511911112222@s.whatsapp.net", "notify": "Bia" },
            { "id": { "user": "5511911112222", "server": "c.us" }, "pushName": "Beatriz Lima" }
        ]))
        .unwrap();
        let (members, skipped) = to_members(raw);
        assert_eq!(skipped, 0);
        assert_eq!(members.len(), 1);
        let names = &members[0].candidate_names;
        assert_eq!(names.notify_name.as_deref(), Some("Bia"));
        assert_eq!(names.profile_name.as_deref(), Some("Beatriz Lima"));
    }
}
