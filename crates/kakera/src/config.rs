use std::{str::FromStr, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::KakeraError;

/// Settings of one download. Passed explicitly to the engine, never read from
/// global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries per fragment after the first attempt. `0` disables retrying.
    pub max_retries: u32,
    pub retry_sleep: RetrySleep,
    /// Stop after the first successful fragment.
    pub test_mode: bool,
    pub is_live: bool,
    /// Skip fragments that were given up instead of aborting the download.
    pub skip_unavailable_fragments: bool,
    /// Resume from a previous partial download of the same output.
    pub continue_partial: bool,
    /// Keep the resume state file after a successful download.
    pub keep_state_file: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_sleep: RetrySleep::None,
            test_mode: false,
            is_live: false,
            skip_unavailable_fragments: false,
            continue_partial: true,
            keep_state_file: false,
        }
    }
}

impl EngineConfig {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_sleep(mut self, retry_sleep: RetrySleep) -> Self {
        self.retry_sleep = retry_sleep;
        self
    }

    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub fn live(mut self, is_live: bool) -> Self {
        self.is_live = is_live;
        self
    }

    pub fn skip_unavailable_fragments(mut self, skip: bool) -> Self {
        self.skip_unavailable_fragments = skip;
        self
    }

    pub fn continue_partial(mut self, continue_partial: bool) -> Self {
        self.continue_partial = continue_partial;
        self
    }

    pub fn keep_state_file(mut self, keep: bool) -> Self {
        self.keep_state_file = keep;
        self
    }
}

/// Delay between two attempts of the same fragment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetrySleep {
    #[default]
    None,
    Fixed {
        secs: f64,
    },
    Linear {
        initial: f64,
        step: f64,
        max: f64,
    },
    Exponential {
        initial: f64,
        base: f64,
        max: f64,
        #[serde(default)]
        jitter: bool,
    },
}

impl RetrySleep {
    /// Delay before retry number `n`, counting from 0.
    pub fn delay(&self, n: u32) -> Option<Duration> {
        let secs = match *self {
            Self::None => return None,
            Self::Fixed { secs } => secs,
            Self::Linear { initial, step, max } => (initial + step * n as f64).min(max),
            Self::Exponential {
                initial,
                base,
                max,
                jitter,
            } => {
                let secs = (initial * base.powi(n as i32)).min(max);
                if jitter {
                    rand::thread_rng().gen_range(0.0..=secs)
                } else {
                    secs
                }
            }
        };

        (secs.is_finite() && secs > 0.).then(|| Duration::from_secs_f64(secs))
    }
}

impl FromStr for RetrySleep {
    type Err = KakeraError;

    /// Parses `none`, `5`, `linear=1:2:10` (initial:step:max) and
    /// `exp=1:2:60` (initial:base:max).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KakeraError::InvalidConfig(format!("invalid retry sleep: {s}"));
        let numbers = |args: &str| -> Result<Vec<f64>, KakeraError> {
            args.split(':')
                .map(|n| n.trim().parse::<f64>().map_err(|_| invalid()))
                .collect()
        };

        if s.eq_ignore_ascii_case("none") {
            return Ok(Self::None);
        }

        match s.split_once('=') {
            None => Ok(Self::Fixed {
                secs: s.trim().parse().map_err(|_| invalid())?,
            }),
            Some(("linear", args)) => match numbers(args)?.as_slice() {
                [initial, step, max] => Ok(Self::Linear {
                    initial: *initial,
                    step: *step,
                    max: *max,
                }),
                _ => Err(invalid()),
            },
            Some(("exp", args)) => match numbers(args)?.as_slice() {
                [initial, base, max] => Ok(Self::Exponential {
                    initial: *initial,
                    base: *base,
                    max: *max,
                    jitter: false,
                }),
                _ => Err(invalid()),
            },
            Some(_) => Err(invalid()),
        }
    }
}
