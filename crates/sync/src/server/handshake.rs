//! Login validation. Checks run in a fixed order and the first failure wins.

use std::collections::BTreeSet;
use std::fmt;

use crate::net::{ClientLogin, ModInfo, ServerDeny};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginCheck {
    Password,
    Version,
    Capacity,
    ModParity,
}

impl LoginCheck {
    pub const ORDER: [LoginCheck; 4] = [
        LoginCheck::Password,
        LoginCheck::Version,
        LoginCheck::Capacity,
        LoginCheck::ModParity,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    InvalidPassword,
    VersionMismatch { server: u16, client: u16 },
    ServerFull,
    ModMismatch {
        missing: Vec<ModInfo>,
        extra: Vec<ModInfo>,
    },
}

impl DenyReason {
    pub fn check(&self) -> LoginCheck {
        match self {
            DenyReason::InvalidPassword => LoginCheck::Password,
            DenyReason::VersionMismatch { .. } => LoginCheck::Version,
            DenyReason::ServerFull => LoginCheck::Capacity,
            DenyReason::ModMismatch { .. } => LoginCheck::ModParity,
        }
    }

    /// The payload sent back on the rejected connection.
    pub fn to_packet(&self) -> ServerDeny {
        let (missing, extra) = match self {
            DenyReason::ModMismatch { missing, extra } => (missing.clone(), extra.clone()),
            _ => (Vec::new(), Vec::new()),
        };
        ServerDeny {
            reason: self.to_string(),
            missing,
            extra,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::InvalidPassword => f.write_str("invalid password"),
            DenyReason::VersionMismatch { server, client } => write!(
                f,
                "game version mismatch: server is build {server}, client is build {client}"
            ),
            DenyReason::ServerFull => f.write_str("server full"),
            DenyReason::ModMismatch { missing, extra } => write!(
                f,
                "mod mismatch: {} missing, {} extra",
                missing.len(),
                extra.len()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(DenyReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

/// What the server compares a login against.
#[derive(Debug, Clone, Copy)]
pub struct LoginPolicy<'a> {
    pub password: &'a str,
    pub build_version: u16,
    pub max_players: usize,
    pub connected: usize,
    pub mods: &'a [ModInfo],
}

pub fn validate(policy: &LoginPolicy<'_>, login: &ClientLogin) -> Verdict {
    for check in LoginCheck::ORDER {
        if let Some(reason) = run_check(check, policy, login) {
            return Verdict::Reject(reason);
        }
    }
    Verdict::Accept
}

fn run_check(check: LoginCheck, policy: &LoginPolicy<'_>, login: &ClientLogin) -> Option<DenyReason> {
    match check {
        LoginCheck::Password => {
            (login.password != policy.password).then_some(DenyReason::InvalidPassword)
        }
        LoginCheck::Version => {
            (login.build_version != policy.build_version).then_some(DenyReason::VersionMismatch {
                server: policy.build_version,
                client: login.build_version,
            })
        }
        LoginCheck::Capacity => {
            (policy.connected >= policy.max_players).then_some(DenyReason::ServerFull)
        }
        LoginCheck::ModParity => {
            let (missing, extra) = mod_diff(policy.mods, &login.mods);
            (!missing.is_empty() || !extra.is_empty())
                .then_some(DenyReason::ModMismatch { missing, extra })
        }
    }
}

/// Returns `(server - client, client - server)`, sorted and without duplicates.
pub fn mod_diff(server: &[ModInfo], client: &[ModInfo]) -> (Vec<ModInfo>, Vec<ModInfo>) {
    let server: BTreeSet<&ModInfo> = server.iter().collect();
    let client: BTreeSet<&ModInfo> = client.iter().collect();
    let missing = server.difference(&client).map(|m| (*m).clone()).collect();
    let extra = client.difference(&server).map(|m| (*m).clone()).collect();
    (missing, extra)
}
