//! Match DNS responses against the application directory.
//!
//! Matching is pure: no registry access, no side effects. The question name is
//! normalized with [`normalize_name`] and compared for exact equality with the
//! normalized domains of every application.

use hickory_proto::op::Message;
use hickory_proto::rr::{RData, Record};
use std::net::Ipv4Addr;

use crate::directory::{normalize_name, AppDirectory};

/// One application whose domain matched the question name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMatch {
    /// Application name from the directory.
    pub app: String,
    /// IPv4 addresses from the answer section, first-seen order, no duplicates.
    pub ips: Vec<Ipv4Addr>,
}

/// Collect the IPv4 addresses of every A record in `answers`.
///
/// Other record types are skipped.
pub fn extract_ipv4(answers: &[Record]) -> Vec<Ipv4Addr> {
    let mut ips = Vec::new();
    for record in answers {
        if let RData::A(a) = record.data() {
            if !ips.contains(&a.0) {
                ips.push(a.0);
            }
        }
    }
    ips
}

/// Match a question name and its answers against the directory.
///
/// Returns one entry per matching application, sorted by application name. An
/// application listing the same domain as another is reported alongside it.
pub fn match_answers(question: &str, answers: &[Record], directory: &AppDirectory) -> Vec<AppMatch> {
    let name = normalize_name(question);
    let apps = directory.apps_for(&name);
    if apps.is_empty() {
        return Vec::new();
    }

    let ips = extract_ipv4(answers);
    apps.iter()
        .map(|app| AppMatch {
            app: app.clone(),
            ips: ips.clone(),
        })
        .collect()
}

/// Match the first question of a DNS message.
///
/// Messages without a question never match.
pub fn match_message(message: &Message, directory: &AppDirectory) -> Vec<AppMatch> {
    match message.queries().first() {
        Some(query) => match_answers(&query.name().to_ascii(), message.answers(), directory),
        None => Vec::new(),
    }
}
