//! Server diagnostics: liveness and identity probes.

use std::io::Write;

use anyhow::Result;

use st_client::{MonitorApi, check_server, check_user};

/// Probes `GET /ping` and reports what the server said.
pub async fn ping<W: Write, A: MonitorApi + Sync>(writer: &mut W, api: &A) -> Result<()> {
    let probe = check_server(api).await;

    let state = if probe.ok { "reachable" } else { "unreachable" };
    writeln!(writer, "Server: {state}")?;
    if let Some(Some(user)) = &probe.update.user {
        writeln!(writer, "User: {user}")?;
    }
    Ok(())
}

/// Probes `GET /current_user`.
pub async fn whoami<W: Write, A: MonitorApi + Sync>(writer: &mut W, api: &A) -> Result<()> {
    let probe = check_user(api).await;

    match &probe.update.user {
        Some(Some(user)) => writeln!(writer, "Logged in as {user}")?,
        Some(None) => writeln!(writer, "Not logged in")?,
        None => writeln!(writer, "Could not determine current user")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use insta::assert_snapshot;

    use st_client::{ActivityReport, ClientError, LogOutcome, UserId};

    #[derive(Debug, Clone, Copy)]
    enum Reply {
        User(&'static str),
        Nobody,
        Status(u16),
        Garbled,
    }

    impl Reply {
        fn resolve(self) -> Result<Option<UserId>, ClientError> {
            match self {
                Self::User(id) => Ok(UserId::new(id)),
                Self::Nobody => Ok(None),
                Self::Status(status) => Err(ClientError::Status { status }),
                Self::Garbled => Err(ClientError::InvalidResponse("expected value".to_string())),
            }
        }
    }

    struct FakeApi(Reply);

    impl MonitorApi for FakeApi {
        async fn ping(&self) -> Result<Option<UserId>, ClientError> {
            self.0.resolve()
        }

        async fn current_user(&self) -> Result<Option<UserId>, ClientError> {
            self.0.resolve()
        }

        async fn log_activity(&self, _report: &ActivityReport) -> Result<LogOutcome, ClientError> {
            unreachable!("probes never submit")
        }
    }

    async fn run_ping(reply: Reply) -> String {
        let mut output = Vec::new();
        ping(&mut output, &FakeApi(reply)).await.unwrap();
        String::from_utf8(output).unwrap()
    }

    async fn run_whoami(reply: Reply) -> String {
        let mut output = Vec::new();
        whoami(&mut output, &FakeApi(reply)).await.unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test]
    async fn ping_reports_reachable_server_and_user() {
        assert_snapshot!(run_ping(Reply::User("42")).await, @r"
        Server: reachable
        User: 42
        ");
        assert_snapshot!(run_ping(Reply::Nobody).await, @"Server: reachable");
    }

    #[tokio::test]
    async fn ping_reports_failures_as_unreachable() {
        assert_snapshot!(run_ping(Reply::Status(500)).await, @"Server: unreachable");
        assert_snapshot!(run_ping(Reply::Garbled).await, @"Server: unreachable");
    }

    #[tokio::test]
    async fn whoami_distinguishes_nobody_from_failure() {
        assert_snapshot!(run_whoami(Reply::User("alice")).await, @"Logged in as alice");
        assert_snapshot!(run_whoami(Reply::Nobody).await, @"Not logged in");
        assert_snapshot!(run_whoami(Reply::Status(503)).await, @"Could not determine current user");
    }
}
