//! Native messaging bridge to the browser extension.
//!
//! Frames are a 4-byte little-endian length followed by that many bytes of
//! UTF-8 JSON, as specified by the browsers' native messaging protocol.

use std::io;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use st_core::{PageEvent, SiteTimes, TabId};

/// Browsers cap messages sent to a native host at 1 MiB.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// A message from the extension.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    TabActivated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    /// An event observed by the content script of a page.
    Page { tab_id: TabId, event: PageEvent },
    /// The page in `tab_id` went away; its detector is dropped.
    PageUnload { tab_id: TabId },
    Control { command: ControlCommand },
}

/// Diagnostic commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Status,
    ForceSend,
    CheckUser,
    CheckServer,
    ClearData,
}

/// Snapshot of the host's state for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub server_reachable: bool,
    pub user_id: Option<String>,
    pub focused_domain: Option<String>,
    pub focus_started: DateTime<Utc>,
    pub site_times: SiteTimes,
    pub tracked_sites: usize,
    pub pages: usize,
}

/// A reply to a control command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostReply {
    Status(StatusSnapshot),
    Submitted { outcome: &'static str },
    UserChecked { logged_in: bool },
    ServerChecked { reachable: bool },
    Cleared,
}

/// Reads one frame. Returns `Ok(None)` when the stream ends between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max: {MAX_MESSAGE_SIZE} bytes)"),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Writes `message` as one frame and flushes.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let json = serde_json::to_vec(message)?;
    let len = u32::try_from(json.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "message too large to frame")
    })?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await
}

/// Parses a frame body into a [`HostMessage`].
pub fn parse_message(body: &[u8]) -> serde_json::Result<HostMessage> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    use st_core::{InteractionKind, MediaElement, MediaKind};

    #[tokio::test]
    async fn reading() {
        let mut data: &[u8] = &[2, 0, 0, 0, b'{', b'}', 9, 9];
        let frame = read_frame(&mut data).await.unwrap();
        assert_eq!(frame, Some(b"{}".to_vec()));
        assert_eq!(data, [9, 9]);
    }

    #[tokio::test]
    async fn reading_eof() {
        let mut data: &[u8] = &[];
        assert_eq!(read_frame(&mut data).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reading_truncated_body_fails() {
        let mut data: &[u8] = &[5, 0, 0, 0, b'{'];
        let err = read_frame(&mut data).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn reading_rejects_oversized_frames() {
        let len = u32::try_from(MAX_MESSAGE_SIZE + 1).unwrap();
        let header = len.to_le_bytes();
        let mut data: &[u8] = &header;
        let err = read_frame(&mut data).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn writing() {
        let mut data = Vec::new();
        write_frame(&mut data, &HostReply::Cleared).await.unwrap();
        let body = br#"{"type":"cleared"}"#;
        assert_eq!(data[..4], u32::try_from(body.len()).unwrap().to_le_bytes());
        assert_eq!(&data[4..], body);
    }

    #[test]
    fn parsing_tab_messages() {
        let message =
            parse_message(br#"{"type":"tab_activated","tab_id":19,"url":"about:blank"}"#).unwrap();
        assert_eq!(
            message,
            HostMessage::TabActivated {
                tab_id: 19,
                url: Some("about:blank".to_string())
            }
        );

        let message = parse_message(br#"{"type":"tab_updated","tab_id":20}"#).unwrap();
        assert_eq!(
            message,
            HostMessage::TabUpdated {
                tab_id: 20,
                url: None
            }
        );
    }

    #[test]
    fn parsing_page_messages() {
        let message = parse_message(
            br#"{"type":"page","tab_id":3,"event":{"type":"media_play","media":{"kind":"audio","id":1}}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            HostMessage::Page {
                tab_id: 3,
                event: PageEvent::MediaPlay {
                    media: MediaElement {
                        kind: MediaKind::Audio,
                        id: 1
                    }
                }
            }
        );

        let message = parse_message(
            br#"{"type":"page","tab_id":3,"event":{"type":"interaction","kind":"scroll"}}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            HostMessage::Page {
                tab_id: 3,
                event: PageEvent::Interaction {
                    kind: InteractionKind::Scroll
                }
            }
        );
    }

    #[test]
    fn parsing_control_messages() {
        let message = parse_message(br#"{"type":"control","command":"force_send"}"#).unwrap();
        assert_eq!(
            message,
            HostMessage::Control {
                command: ControlCommand::ForceSend
            }
        );
        assert!(parse_message(br#"{"type":"control","command":"reboot"}"#).is_err());
    }
}
