//! Provider output formats.
//!
//! Pure functions. No I/O and no async runtime.
//!
//! Formats use the provider's `codec_samplerate[_bitrate]` notation, e.g.
//! `mp3_44100_128` (MP3, 44.1 kHz, 128 kbps) or `pcm_24000`.

use std::fmt;
use std::str::FromStr;

/// Audio codec of a synthesis response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Mp3,
    Opus,
    Pcm,
    Ulaw,
    Alaw,
}

impl Codec {
    fn as_str(self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Opus => "opus",
            Codec::Pcm => "pcm",
            Codec::Ulaw => "ulaw",
            Codec::Alaw => "alaw",
        }
    }

    /// Compressed codecs carry a bitrate; raw ones must not.
    fn has_bitrate(self) -> bool {
        matches!(self, Codec::Mp3 | Codec::Opus)
    }
}

/// Encoding requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub codec: Codec,
    pub sample_rate: u32,
    /// Bitrate in kbps, only for compressed codecs.
    pub bitrate: Option<u32>,
}

/// MP3 at 44.1 kHz / 128 kbps.
pub const DEFAULT_OUTPUT_FORMAT: OutputFormat = OutputFormat {
    codec: Codec::Mp3,
    sample_rate: 44_100,
    bitrate: Some(128),
};

impl Default for OutputFormat {
    fn default() -> Self {
        DEFAULT_OUTPUT_FORMAT
    }
}

impl OutputFormat {
    /// MIME type used when serving or saving the buffer.
    pub fn mime_type(&self) -> &'static str {
        match self.codec {
            Codec::Mp3 => "audio/mpeg",
            Codec::Opus => "audio/opus",
            Codec::Pcm => "audio/L16",
            Codec::Ulaw => "audio/basic",
            Codec::Alaw => "audio/x-alaw-basic",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        self.codec.as_str()
    }

    /// Default download file name, `speech.<ext>`.
    pub fn download_name(&self) -> String {
        format!("speech.{}", self.file_extension())
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.codec.as_str(), self.sample_rate)?;
        if let Some(bitrate) = self.bitrate {
            write!(f, "_{bitrate}")?;
        }
        Ok(())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('_');

        let codec = match parts.next() {
            Some("mp3") => Codec::Mp3,
            Some("opus") => Codec::Opus,
            Some("pcm") => Codec::Pcm,
            Some("ulaw") => Codec::Ulaw,
            Some("alaw") => Codec::Alaw,
            _ => return Err(format!("unknown output format '{s}'")),
        };

        let sample_rate = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .filter(|&rate| rate > 0)
            .ok_or_else(|| format!("output format '{s}' is missing a sample rate"))?;

        let bitrate = match parts.next() {
            Some(p) => Some(
                p.parse::<u32>()
                    .map_err(|_| format!("invalid bitrate in output format '{s}'"))?,
            ),
            None => None,
        };

        if parts.next().is_some() {
            return Err(format!("unexpected trailing fields in output format '{s}'"));
        }

        match (codec.has_bitrate(), bitrate) {
            (true, None) => Err(format!("output format '{s}' needs a bitrate")),
            (false, Some(_)) => Err(format!("output format '{s}' takes no bitrate")),
            _ => Ok(Self {
                codec,
                sample_rate,
                bitrate,
            }),
        }
    }
}
