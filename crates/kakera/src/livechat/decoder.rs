use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        LazyLock,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use regex::Regex;
use serde_json::{json, Value};

use super::LiveChatMode;
use crate::{
    error::{KakeraError, KakeraResult},
    fetch::ResponseDecoder,
    fragment::{Continuation, FragmentIndex, FragmentRequest, FragmentResult},
};

static INITIAL_DATA_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)(?:window\s*\[\s*["']ytInitialData["']\s*\]|ytInitialData)\s*=\s*(\{.+?\})\s*;\s*(?:var\s+meta|</script|\n)"#,
    )
    .unwrap()
});

const BOOTSTRAP_CONTINUATION: &str = "/contents/twoColumnWatchNextResults/conversationBar/liveChatRenderer/continuations/0/reloadContinuationData/continuation";
const REFRESH_CONTINUATION: &str = "/header/liveChatHeaderRenderer/viewSelector/sortFilterSubMenuRenderer/subMenuItems/1/continuation/reloadContinuationData";

const ACTION_CONTENT_KEYS: [&str; 3] = [
    "addChatItemAction",
    "addLiveChatTickerItemAction",
    "addBannerToLiveChatCommand",
];
const MESSAGE_RENDERER_KEYS: [&str; 4] = [
    "liveChatTextMessageRenderer",
    "liveChatPaidMessageRenderer",
    "liveChatMembershipItemRenderer",
    "liveChatPaidStickerRenderer",
];
const TICKER_RENDERER_KEYS: [&str; 3] = [
    "liveChatTickerPaidMessageItemRenderer",
    "liveChatTickerSponsorItemRenderer",
    "liveChatBannerRenderer",
];

/// Extract the initial data from a watch or chat page, falling back to a
/// plain JSON document.
pub fn parse_initial_data(body: &[u8]) -> KakeraResult<Value> {
    let text = String::from_utf8_lossy(body);
    if let Some(data) = INITIAL_DATA_REGEX
        .captures(&text)
        .and_then(|c| c.get(1))
        .and_then(|m| serde_json::from_str(m.as_str()).ok())
    {
        return Ok(data);
    }
    Ok(serde_json::from_slice(body)?)
}

/// First value of `keys` present in `value`.
fn dict_get<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| value.get(*key))
}

/// Decodes chat pages into JSON lines, one action per line.
pub struct LiveChatDecoder {
    mode: LiveChatMode,
    /// Offset of the last timestamped live action, relative to `started_ms`.
    live_offset: AtomicI64,
    started_ms: i64,
}

impl LiveChatDecoder {
    pub fn new(mode: LiveChatMode) -> Self {
        let started_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self::with_start_time(mode, started_ms)
    }

    /// `started_ms` is the wall clock time live offsets are measured from.
    pub fn with_start_time(mode: LiveChatMode, started_ms: i64) -> Self {
        Self {
            mode,
            live_offset: AtomicI64::new(0),
            started_ms,
        }
    }

    fn decode_bootstrap(&self, body: &[u8]) -> KakeraResult<FragmentResult> {
        let data = parse_initial_data(body)
            .map_err(|_| KakeraError::Bootstrap("initial data not found in the page".to_string()))?;
        let continuation = data
            .pointer(BOOTSTRAP_CONTINUATION)
            .and_then(Value::as_str)
            .map(|id| Continuation::LiveChat {
                id: id.to_string(),
                click_tracking_params: None,
            });

        Ok(FragmentResult::new(FragmentIndex::Bootstrap, Bytes::new()).with_continuation(continuation))
    }

    fn parse_replay(&self, index: FragmentIndex, chat: &Value) -> KakeraResult<FragmentResult> {
        let mut offset = None;
        let mut payload = Vec::new();
        for action in actions(chat) {
            if let Some(item) = action.get("replayChatItemAction") {
                offset = item.get("videoOffsetTimeMsec").and_then(as_i64);
            }
            write_line(&mut payload, action)?;
        }

        let continuation = offset
            .and_then(|_| chat.pointer("/continuations/0/liveChatReplayContinuationData"))
            .and_then(continuation_from);
        Ok(FragmentResult::new(index, payload)
            .with_continuation(continuation)
            .with_offset(offset.map(|o| o.max(0) as u64)))
    }

    /// The first replay page may point to the unfiltered replay instead.
    fn try_refresh_replay_beginning(
        &self,
        index: FragmentIndex,
        chat: &Value,
    ) -> KakeraResult<FragmentResult> {
        let Some(refresh) = chat.pointer(REFRESH_CONTINUATION) else {
            return self.parse_replay(index, chat);
        };
        let continuation = refresh
            .get("continuation")
            .and_then(Value::as_str)
            .map(|id| Continuation::LiveChat {
                id: id.to_string(),
                click_tracking_params: refresh
                    .get("trackingParams")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            });
        tracing::debug!("Restarting the replay from the unfiltered chat.");
        Ok(FragmentResult::new(index, Bytes::new())
            .with_continuation(continuation)
            .with_offset(Some(0)))
    }

    fn parse_live(&self, index: FragmentIndex, chat: &Value) -> KakeraResult<FragmentResult> {
        let mut payload = Vec::new();
        for action in actions(chat) {
            if let Some(timestamp) = live_timestamp(action) {
                self.live_offset
                    .store(timestamp - self.started_ms, Ordering::Relaxed);
            }
            let pseudo_action = json!({
                "replayChatItemAction": { "actions": [action] },
                "videoOffsetTimeMsec": self.live_offset.load(Ordering::Relaxed).to_string(),
                "isLive": true,
            });
            write_line(&mut payload, &pseudo_action)?;
        }

        let data = chat
            .pointer("/continuations/0/invalidationContinuationData")
            .or_else(|| chat.pointer("/continuations/0/timedContinuationData"));
        let poll_delay = data
            .and_then(|d| d.get("timeoutMs"))
            .and_then(as_i64)
            .map(|ms| Duration::from_millis(ms.max(0) as u64));
        let offset = self.live_offset.load(Ordering::Relaxed).max(0) as u64;

        Ok(FragmentResult::new(index, payload)
            .with_continuation(data.and_then(continuation_from))
            .with_offset(Some(offset))
            .with_poll_delay(poll_delay))
    }
}

impl ResponseDecoder for LiveChatDecoder {
    fn decode(&self, request: &FragmentRequest, body: Bytes) -> KakeraResult<FragmentResult> {
        if request.index.is_bootstrap() {
            return self.decode_bootstrap(&body);
        }

        let data = parse_initial_data(&body)?;
        let chat = data
            .pointer("/continuationContents/liveChatContinuation")
            .filter(|c| c.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));

        match (self.mode, request.index) {
            (LiveChatMode::Live, index) => self.parse_live(index, &chat),
            (LiveChatMode::Replay, index @ FragmentIndex::Ordinal(1)) => {
                self.try_refresh_replay_beginning(index, &chat)
            }
            (LiveChatMode::Replay, index) => self.parse_replay(index, &chat),
        }
    }
}

fn actions(chat: &Value) -> impl Iterator<Item = &Value> {
    chat.get("actions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn write_line(payload: &mut Vec<u8>, value: &Value) -> KakeraResult<()> {
    serde_json::to_writer(&mut *payload, value)?;
    payload.push(b'\n');
    Ok(())
}

/// Numbers arrive either as JSON numbers or as strings.
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn continuation_from(data: &Value) -> Option<Continuation> {
    let id = data.get("continuation")?.as_str()?;
    Some(Continuation::LiveChat {
        id: id.to_string(),
        click_tracking_params: data
            .get("clickTrackingParams")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Wall clock time of a live action in milliseconds.
fn live_timestamp(action: &Value) -> Option<i64> {
    let content = dict_get(action, &ACTION_CONTENT_KEYS)?;
    let item = dict_get(content, &["item", "bannerRenderer"])?;
    let renderer_keys: Vec<&str> = MESSAGE_RENDERER_KEYS
        .iter()
        .chain(TICKER_RENDERER_KEYS.iter())
        .copied()
        .collect();
    let mut renderer = dict_get(item, &renderer_keys)?;

    let parent = renderer
        .pointer("/showItemEndpoint/showLiveChatItemEndpoint/renderer")
        .or_else(|| renderer.get("contents"))
        .filter(|p| p.is_object());
    if let Some(parent) = parent {
        renderer = dict_get(parent, &MESSAGE_RENDERER_KEYS)?;
    }

    renderer.get("timestampUsec").and_then(as_i64).map(|us| us / 1000)
}
