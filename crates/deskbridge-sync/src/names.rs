// SPDX-FileCopyrightText: 2026 Deskbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Display-name selection for helpdesk contacts.

use deskbridge_core::jid;
use deskbridge_storage::MirrorContact;

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Whether the contact has an address book entry or a verified business name.
///
/// A full name equal to the push name was copied from the profile and does
/// not count.
pub fn is_saved(contact: &MirrorContact) -> bool {
    if non_empty(contact.business_name.as_deref()).is_some()
        || non_empty(contact.first_name.as_deref()).is_some()
    {
        return true;
    }
    match non_empty(contact.full_name.as_deref()) {
        Some(full) => non_empty(contact.push_name.as_deref()) != Some(full),
        None => false,
    }
}

/// Name from the address book, ignoring profile copies.
fn explicit_name(contact: &MirrorContact) -> Option<&str> {
    let full = non_empty(contact.full_name.as_deref());
    let push = non_empty(contact.push_name.as_deref());
    match full {
        Some(full) if Some(full) != push => Some(full),
        _ => non_empty(contact.first_name.as_deref()).or(full.filter(|_| push.is_none())),
    }
}

/// Display name of an individual chat.
///
/// Verified business name, then address book name, then the self-chosen
/// push name, then the E.164 phone, then the raw user part of `jid`.
pub fn individual_name(
    contact: Option<&MirrorContact>,
    push_name: Option<&str>,
    phone_digits: Option<&str>,
    remote_jid: &str,
) -> String {
    if let Some(contact) = contact {
        if let Some(name) = non_empty(contact.business_name.as_deref()).or(explicit_name(contact)) {
            return name.to_string();
        }
        if let Some(name) = non_empty(contact.push_name.as_deref()) {
            return name.to_string();
        }
    }
    if let Some(name) = non_empty(push_name) {
        return name.to_string();
    }
    match phone_digits {
        Some(digits) => jid::e164(digits),
        None => jid::user_part(remote_jid).to_string(),
    }
}

/// Display name of a group chat: its subject, else its id.
pub fn group_name(subject: Option<&str>, group_jid: &str) -> String {
    non_empty(subject)
        .map(str::to_string)
        .unwrap_or_else(|| jid::user_part(group_jid).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(
        first: Option<&str>,
        full: Option<&str>,
        push: Option<&str>,
        business: Option<&str>,
    ) -> MirrorContact {
        MirrorContact {
            session_id: "s".into(),
            jid: "5511999990000@s.whatsapp.net".into(),
            first_name: first.map(Into::into),
            full_name: full.map(Into::into),
            push_name: push.map(Into::into),
            business_name: business.map(Into::into),
        }
    }

    #[test]
    fn saved_rule() {
        assert!(is_saved(&contact(Some("Ana"), None, None, None)));
        assert!(is_saved(&contact(None, None, None, Some("Ana's Bakery"))));
        assert!(is_saved(&contact(None, Some("Ana Souza"), Some("ana"), None)));
        assert!(!is_saved(&contact(None, Some("ana"), Some("ana"), None)));
        assert!(!is_saved(&contact(None, None, Some("ana"), None)));
        assert!(!is_saved(&contact(Some("  "), None, None, None)));
    }

    #[test]
    fn name_priority() {
        let jid = "5511999990000@s.whatsapp.net";
        let c = contact(Some("Ana"), Some("Ana Souza"), Some("ana"), Some("Bakery"));
        assert_eq!(individual_name(Some(&c), None, Some("5511999990000"), jid), "Bakery");

        let c = contact(Some("Ana"), Some("Ana Souza"), Some("ana"), None);
        assert_eq!(individual_name(Some(&c), None, None, jid), "Ana Souza");

        let c = contact(None, Some("ana"), Some("ana"), None);
        assert_eq!(individual_name(Some(&c), Some("other"), None, jid), "ana");

        assert_eq!(individual_name(None, Some("Bo"), Some("5511999990000"), jid), "Bo");
        assert_eq!(
            individual_name(None, None, Some("5511999990000"), jid),
            "+5511999990000"
        );
        assert_eq!(individual_name(None, None, None, "98765@lid"), "98765");
    }

    #[test]
    fn group_falls_back_to_id() {
        assert_eq!(group_name(Some("Team"), "1203@g.us"), "Team");
        assert_eq!(group_name(Some(" "), "1203@g.us"), "1203");
    }
}
