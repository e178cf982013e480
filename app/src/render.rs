use gatedeck_core::{AuthSession, AuthWorkflowState, ConnectionState, SharedLogSink};

/// Prints only what arrived since the last call.
#[derive(Debug, Default)]
pub struct LogTail {
    seen: u64,
}

impl LogTail {
    /// Starts after everything `sink` has already received.
    pub fn after(sink: &SharedLogSink) -> Self {
        Self {
            seen: sink.read(|s| s.total_appended()),
        }
    }

    /// Newly appended entries that pass the sink's filter, as transcript lines.
    pub fn drain(&mut self, sink: &SharedLogSink) -> Vec<String> {
        sink.read(|s| {
            let total = s.total_appended();
            let fresh = total.saturating_sub(self.seen);
            self.seen = total;
            let fresh = usize::try_from(fresh).unwrap_or(usize::MAX);
            s.latest(fresh)
                .filter(|entry| s.filter().matches(entry))
                .map(|entry| entry.to_line())
                .collect()
        })
    }
}

pub fn connection_line(state: ConnectionState) -> String {
    match state {
        ConnectionState::PollingFallback => {
            "log feed: live stream unavailable, polling every few seconds".to_string()
        }
        other => format!("log feed: {}", other.label()),
    }
}

pub fn auth_prompt(session: &AuthSession) -> String {
    let mut out = format!(
        "Sign in with {} to link \"{}\":\n  {}\n",
        session.provider_label, session.account_label, session.external_url
    );
    if let Some(code) = &session.device_code {
        out.push_str(&format!("Device code: {code}\n"));
    }
    if let Some(uri) = &session.verification_uri {
        out.push_str(&format!("Verify at: {uri}\n"));
    }
    if let Some(secs) = session.expires_in {
        out.push_str(&format!("Expires in {} min\n", secs.div_ceil(60)));
    }
    out
}

pub fn auth_outcome(state: &AuthWorkflowState) -> String {
    match state {
        AuthWorkflowState::Succeeded { account } => {
            format!("Linked account \"{}\" (id {})", account.name, account.id)
        }
        AuthWorkflowState::Failed { message } => format!("Account link failed: {message}"),
        AuthWorkflowState::Cancelled => "Account link cancelled".to_string(),
        other => format!("Account link {}", other.name()),
    }
}
