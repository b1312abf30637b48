//! Beat pattern generation through the Grok chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::{AdapterResult, BeatPatternSource, FailureReason};
use crate::config::AppConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const BEAT_PROMPT_TEMPLATE: &str = r#"You are a professional hip-hop producer. Generate a beat pattern for a {style} rap beat.

OUTPUT FORMAT: Return ONLY valid JSON. No explanations, no markdown code blocks, just raw JSON.

SCHEMA:
{
  "metadata": {
    "title": "<creative beat name>",
    "style": "{style}",
    "bpm": {bpm},
    "time_signature": [4, 4],
    "bars": {bars},
    "loopable": true
  },
  "tracks": {
    "K": { "name": "kick", "file": "kick-drum-263837.wav" },
    "S": { "name": "snare", "file": "snare-drum-341273.wav" },
    "H": { "name": "hi-hat", "file": "hi-hat-231042.wav" },
    "B": { "name": "808-bass", "file": "808-bass-drum-421219.wav" },
    "C": { "name": "clap", "file": "clap-375693.wav" },
    "O": { "name": "open-hat", "file": "open-hi-hat-431740.wav" },
    "X": { "name": "crash", "file": "tr808-crash-cymbal-241377.wav" },
    "P": { "name": "perc", "file": "shaker-drum-434902.wav" }
  },
  "pattern": [
    {
      "bar": 1,
      "beats": [
        { "beat": 1, "events": [{"sound": "K", "duration": "q"}, {"sound": "B", "duration": "q"}] },
        { "beat": 1.5, "events": [{"sound": "H", "duration": "e"}] },
        { "beat": 2, "events": [{"sound": "H", "duration": "e"}] },
        { "beat": 3, "events": [{"sound": "S", "duration": "q"}] }
      ]
    }
  ]
}

NOTATION RULES:
- Sound codes: K=kick, S=snare, H=hi-hat(closed), B=808-bass, C=clap, O=open-hat, X=crash, P=perc/shaker, "-"=rest(silence)
- Duration codes: w=whole(4 beats), h=half(2), q=quarter(1), e=eighth(0.5), s=sixteenth(0.25)
- Beat positions: 1, 1.25, 1.5, 1.75, 2, 2.25, 2.5, 2.75, 3, 3.25, 3.5, 3.75, 4, 4.25, 4.5, 4.75
- Multiple sounds can play simultaneously (list in "events" array)
- Omit beat positions that have no events (implicit rest)
- Use "-" explicitly when you want to emphasize a rest in the notation

STYLE GUIDE:
- trap: 130-150 BPM, heavy 808s on beat 1, rolling hi-hats (s duration), claps layered with snares on beat 3, syncopated kicks, open hats for accents
- boom bap: 85-95 BPM, punchy kicks on 1+3, snares on 2+4, sparse hi-hats (e duration), classic swing feel
- west coast: 90-105 BPM, bouncy g-funk kicks, layered with 808, claps on 2+4, open hats for groove
- drill: 140-150 BPM, sliding 808 patterns, aggressive triplet hi-hats, hard snares+claps, open hats for tension

Generate a {bars}-bar loopable {style} beat pattern. Make it groove!"#;

static OPENING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(?:json)?\s*\n?").unwrap());
static CLOSING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n?```\s*$").unwrap());

/// Strip markdown code fences the model sometimes wraps its JSON in.
fn strip_code_fences(content: &str) -> String {
    let content = content.trim();
    if !content.starts_with("```") {
        return content.to_string();
    }
    let content = OPENING_FENCE.replace(content, "");
    CLOSING_FENCE.replace(&content, "").trim().to_string()
}

pub struct GrokPatternSource {
    client: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
    model: String,
}

impl GrokPatternSource {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.voice_api_key.clone(),
            api_base: config.pattern_api_base.trim_end_matches('/').to_string(),
            model: config.pattern_model.clone(),
        }
    }
}

#[async_trait]
impl BeatPatternSource for GrokPatternSource {
    async fn generate_pattern(&self, style: &str, bpm: u32, bars: u32) -> AdapterResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| FailureReason::ConfigMissing("XAI_API_KEY not set".into()))?;

        let prompt = BEAT_PROMPT_TEMPLATE
            .replace("{style}", style)
            .replace("{bpm}", &bpm.to_string())
            .replace("{bars}", &bars.to_string());
        info!("Requesting {bars}-bar {style} pattern at {bpm} BPM");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(api_key)
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": 0.7,
                "max_tokens": 4000,
            }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(FailureReason::from_request_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FailureReason::upstream(Some(status), body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(FailureReason::from_request_error)?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                FailureReason::Malformed("no message content in completion response".into())
            })?;

        Ok(strip_code_fences(content))
    }
}
