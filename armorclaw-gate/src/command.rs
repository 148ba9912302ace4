//! Control-plane command parsing.
//!
//! A body beginning with `/` may be a command. Recognized commands are
//! consumed by the gate and routed to the bridge's handler; anything
//! else starting with `/` is NOT consumed and flows to subscribers like
//! a normal message.

/// A recognized control-plane command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/claim_admin [args…]` — begin or answer the admin-claim challenge.
    ClaimAdmin {
        /// Whatever followed the command token.
        args: Vec<String>,
    },
    /// `/status` — report bridge status to the room.
    Status,
    /// `/verify` — run an audit-chain verification and report.
    Verify,
    /// `/approve [args…]` — approve a pending action.
    Approve {
        /// Whatever followed the command token.
        args: Vec<String>,
    },
    /// `/reject [args…]` — reject a pending action.
    Reject {
        /// Whatever followed the command token.
        args: Vec<String>,
    },
    /// `/help` — list available commands.
    Help,
    /// `<consent_prefix> approve [args…]` — consent approval.
    ConsentApprove {
        /// Whatever followed the subcommand.
        args: Vec<String>,
    },
    /// `<consent_prefix> reject [args…]` — consent rejection.
    ConsentReject {
        /// Whatever followed the subcommand.
        args: Vec<String>,
    },
}

impl Command {
    /// The canonical token of this command, for logging.
    pub fn token(&self) -> &'static str {
        match self {
            Command::ClaimAdmin { .. } => "claim_admin",
            Command::Status => "status",
            Command::Verify => "verify",
            Command::Approve { .. } => "approve",
            Command::Reject { .. } => "reject",
            Command::Help => "help",
            Command::ConsentApprove { .. } => "consent_approve",
            Command::ConsentReject { .. } => "consent_reject",
        }
    }
}

/// Parse `body` as a command.
///
/// `consent_prefix` is the configurable consent command token, without
/// the leading slash (default `consent`). Returns `None` for anything
/// that is not a recognized command, including unknown `/`-prefixed
/// bodies, which must pass through to subscribers unconsumed.
pub fn parse(body: &str, consent_prefix: &str) -> Option<Command> {
    let rest = body.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let token = parts.next()?;
    let args: Vec<String> = parts.map(|s| s.to_string()).collect();

    if token == consent_prefix {
        let mut args = args;
        if args.is_empty() {
            return None;
        }
        let sub = args.remove(0);
        return match sub.as_str() {
            "approve" => Some(Command::ConsentApprove { args }),
            "reject" => Some(Command::ConsentReject { args }),
            _ => None,
        };
    }

    match token {
        "claim_admin" => Some(Command::ClaimAdmin { args }),
        "status" => Some(Command::Status),
        "verify" => Some(Command::Verify),
        "approve" => Some(Command::Approve { args }),
        "reject" => Some(Command::Reject { args }),
        "help" => Some(Command::Help),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse("/status", "consent"), Some(Command::Status));
        assert_eq!(parse("/verify", "consent"), Some(Command::Verify));
        assert_eq!(parse("/help", "consent"), Some(Command::Help));
    }

    #[test]
    fn parses_claim_admin_with_args() {
        assert_eq!(
            parse("/claim_admin Element X", "consent"),
            Some(Command::ClaimAdmin {
                args: vec!["Element".to_string(), "X".to_string()]
            })
        );
    }

    #[test]
    fn parses_consent_subcommands_under_prefix() {
        assert_eq!(
            parse("/consent approve req-1", "consent"),
            Some(Command::ConsentApprove {
                args: vec!["req-1".to_string()]
            })
        );
        assert_eq!(
            parse("/ok reject req-2", "ok"),
            Some(Command::ConsentReject {
                args: vec!["req-2".to_string()]
            })
        );
        assert_eq!(parse("/consent dance", "consent"), None);
        assert_eq!(parse("/consent", "consent"), None);
    }

    #[test]
    fn unknown_commands_are_not_consumed() {
        assert_eq!(parse("/deploy prod", "consent"), None);
        assert_eq!(parse("//status", "consent"), None);
    }

    #[test]
    fn non_commands_are_not_commands() {
        assert_eq!(parse("status", "consent"), None);
        assert_eq!(parse("", "consent"), None);
        assert_eq!(parse("/", "consent"), None);
    }
}
