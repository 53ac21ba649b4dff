use log::warn;
use std::sync::Arc;

use crate::fabric::{ChannelFabric, FetchedMessage};

const PAGE_SIZE: usize = 100;
const MAX_TRANSCRIPT_BYTES: usize = 1024 * 1024;

/// Flattened chronological text log of a ticket channel, generated at
/// close time.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub line_count: usize,
    /// A fetch failed partway; the text holds everything collected so
    /// far.
    pub partial: bool,
}

impl Transcript {
    pub fn file_name(channel_name: &str) -> String {
        format!("transcript-{channel_name}.txt")
    }
}

pub struct TranscriptArchiver {
    fabric: Arc<dyn ChannelFabric>,
}

impl TranscriptArchiver {
    pub fn new(fabric: Arc<dyn ChannelFabric>) -> Self {
        Self { fabric }
    }

    /// Page through the channel newest-first (each page's oldest id is
    /// the next `before` cursor), then render oldest-to-newest. A
    /// mid-fetch failure degrades to a partial transcript instead of
    /// failing the close.
    pub async fn archive(&self, channel_id: &str) -> Transcript {
        let mut newest_first: Vec<FetchedMessage> = Vec::new();
        let mut before: Option<String> = None;
        let mut partial = false;

        loop {
            let page = match self
                .fabric
                .fetch_messages(channel_id, PAGE_SIZE, before.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!("transcript fetch for {channel_id} failed partway: {e}");
                    partial = true;
                    break;
                }
            };

            let short_page = page.len() < PAGE_SIZE;
            if let Some(oldest) = page.last() {
                before = Some(oldest.id.clone());
            }
            newest_first.extend(page);

            if short_page {
                break;
            }
        }

        newest_first.reverse();
        let lines: Vec<String> = newest_first.iter().map(render_line).collect();
        let (text, dropped) = join_capped(&lines, MAX_TRANSCRIPT_BYTES);
        if dropped > 0 {
            warn!("transcript for {channel_id} truncated, dropped {dropped} oldest lines");
        }

        Transcript {
            text,
            line_count: lines.len() - dropped,
            partial,
        }
    }
}

fn render_line(msg: &FetchedMessage) -> String {
    let mut line = format!(
        "[{}] {}: {}",
        msg.timestamp.to_rfc3339(),
        msg.author_name,
        msg.content
    );
    if msg.attachment_count > 0 {
        line.push_str(&format!(" [attachments:{}]", msg.attachment_count));
    }
    line
}

/// Join lines with newlines, dropping from the front when the byte cap
/// is exceeded so the tail of the conversation survives.
fn join_capped(lines: &[String], max_bytes: usize) -> (String, usize) {
    let mut total = 0usize;
    let mut start = lines.len();
    for (i, line) in lines.iter().enumerate().rev() {
        let cost = line.len() + 1;
        if total + cost > max_bytes {
            break;
        }
        total += cost;
        start = i;
    }
    (lines[start..].join("\n"), start)
}
