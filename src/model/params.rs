//! Encoder send parameters
//!
//! Mirrors the RTP sender parameter set exposed by WebRTC stacks: one entry
//! per encoding layer, each carrying its own bitrate and framerate limits.

use serde::{Deserialize, Serialize};

use crate::error::SenderError;

/// Parameters of a single encoding layer. Bitrates are in bits per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingParameters {
    pub rid: Option<String>,
    pub active: bool,
    pub min_bitrate: Option<u64>,
    pub max_bitrate: Option<u64>,
    pub max_framerate: Option<u32>,
    pub scale_resolution_down_by: Option<f64>,
}

impl Default for EncodingParameters {
    fn default() -> Self {
        Self {
            rid: None,
            active: true,
            min_bitrate: None,
            max_bitrate: None,
            max_framerate: None,
            scale_resolution_down_by: None,
        }
    }
}

/// The full parameter set of an RTP sender.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SendParameters {
    pub encodings: Vec<EncodingParameters>,
}

impl SendParameters {
    /// A parameter set with one unconstrained layer.
    pub fn single_layer() -> SendParameters {
        SendParameters {
            encodings: vec![EncodingParameters::default()],
        }
    }

    /// Sum of the `max_bitrate` of every active layer that sets one.
    pub fn total_max_bitrate(&self) -> u64 {
        self.encodings
            .iter()
            .filter(|e| e.active)
            .filter_map(|e| e.max_bitrate)
            .sum()
    }
}

/// A partial change to [`SendParameters`].
///
/// A `None` field leaves the corresponding value untouched, so a congestion
/// back-off can move the bitrate without resetting the framerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterUpdate {
    pub bitrate_kbps: Option<u64>,
    pub max_framerate: Option<u32>,
}

impl ParameterUpdate {
    pub fn new(bitrate_kbps: Option<u64>, max_framerate: Option<u32>) -> ParameterUpdate {
        ParameterUpdate {
            bitrate_kbps,
            max_framerate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bitrate_kbps.is_none() && self.max_framerate.is_none()
    }

    /// Apply the update to every encoding layer. The bitrate pins both the
    /// minimum and maximum of each layer.
    pub fn apply(&self, parameters: &mut SendParameters) -> Result<(), SenderError> {
        let bitrate = self
            .bitrate_kbps
            .map(|kbps| {
                kbps.checked_mul(1000)
                    .ok_or(SenderError::BitrateOverflow(kbps))
            })
            .transpose()?;

        for encoding in &mut parameters.encodings {
            if let Some(bps) = bitrate {
                encoding.min_bitrate = Some(bps);
                encoding.max_bitrate = Some(bps);
            }

            if let Some(fps) = self.max_framerate {
                encoding.max_framerate = Some(fps);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_layers() -> SendParameters {
        SendParameters {
            encodings: vec![
                EncodingParameters {
                    rid: Some("h".into()),
                    max_framerate: Some(60),
                    ..Default::default()
                },
                EncodingParameters {
                    rid: Some("q".into()),
                    max_framerate: Some(30),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn bitrate_only_leaves_framerate() {
        let mut params = two_layers();
        ParameterUpdate::new(Some(500), None)
            .apply(&mut params)
            .unwrap();

        for (encoding, fps) in params.encodings.iter().zip([60, 30]) {
            assert_eq!(encoding.min_bitrate, Some(500_000));
            assert_eq!(encoding.max_bitrate, Some(500_000));
            assert_eq!(encoding.max_framerate, Some(fps));
        }
    }

    #[test]
    fn framerate_only_leaves_bitrate() {
        let mut params = two_layers();
        params.encodings[0].max_bitrate = Some(1_000_000);
        ParameterUpdate::new(None, Some(24))
            .apply(&mut params)
            .unwrap();

        assert_eq!(params.encodings[0].max_bitrate, Some(1_000_000));
        assert_eq!(params.encodings[1].max_bitrate, None);
        assert!(params.encodings.iter().all(|e| e.max_framerate == Some(24)));
    }

    #[test]
    fn overflowing_bitrate_is_rejected_untouched() {
        let mut params = two_layers();
        let before = params.clone();
        let err = ParameterUpdate::new(Some(u64::MAX), Some(10))
            .apply(&mut params)
            .unwrap_err();

        assert!(matches!(err, SenderError::BitrateOverflow(u64::MAX)));
        assert_eq!(params, before);
    }

    #[test]
    fn total_counts_active_layers() {
        let mut params = two_layers();
        params.encodings[0].max_bitrate = Some(300);
        params.encodings[1].max_bitrate = Some(200);
        assert_eq!(params.total_max_bitrate(), 500);

        params.encodings[1].active = false;
        assert_eq!(params.total_max_bitrate(), 300);
    }
}
