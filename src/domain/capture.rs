//! Capture encodings and the normalized form handed to transcription.

use serde::{Deserialize, Serialize};

/// What a capture contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Medium {
    /// Voice recording
    Audio,

    /// Photographed text
    Image,
}

/// Container/codec encodings the normalizer recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Flac,
    M4a,
    Mp3,
    Mp4,
    Mpeg,
    Mpga,
    Oga,
    Ogg,
    Wav,
    Webm,
    Aac,
    Amr,
    ThreeGp,
    Aiff,
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
    Tiff,
    Heic,
}

impl Encoding {
    pub fn medium(self) -> Medium {
        match self {
            Self::Png | Self::Jpeg | Self::Gif | Self::Webp | Self::Bmp | Self::Tiff | Self::Heic => {
                Medium::Image
            }
            _ => Medium::Audio,
        }
    }

    /// Whether transcription providers accept this encoding as-is
    pub fn is_whitelisted(self) -> bool {
        matches!(
            self,
            Self::Flac
                | Self::M4a
                | Self::Mp3
                | Self::Mp4
                | Self::Mpeg
                | Self::Mpga
                | Self::Oga
                | Self::Ogg
                | Self::Wav
                | Self::Webm
                | Self::Png
                | Self::Jpeg
                | Self::Gif
                | Self::Webp
        )
    }

    /// Encoding a non-whitelisted capture of this medium is converted to
    pub fn canonical_for(medium: Medium) -> Self {
        match medium {
            Medium::Audio => Self::Wav,
            Medium::Image => Self::Jpeg,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Flac => "flac",
            Self::M4a => "m4a",
            Self::Mp3 => "mp3",
            Self::Mp4 => "mp4",
            Self::Mpeg => "mpeg",
            Self::Mpga => "mpga",
            Self::Oga => "oga",
            Self::Ogg => "ogg",
            Self::Wav => "wav",
            Self::Webm => "webm",
            Self::Aac => "aac",
            Self::Amr => "amr",
            Self::ThreeGp => "3gp",
            Self::Aiff => "aiff",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
            Self::Heic => "heic",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Flac => "audio/flac",
            Self::M4a => "audio/mp4",
            Self::Mp3 | Self::Mpga => "audio/mpeg",
            Self::Mp4 => "video/mp4",
            Self::Mpeg => "video/mpeg",
            Self::Oga | Self::Ogg => "audio/ogg",
            Self::Wav => "audio/wav",
            Self::Webm => "audio/webm",
            Self::Aac => "audio/aac",
            Self::Amr => "audio/amr",
            Self::ThreeGp => "audio/3gpp",
            Self::Aiff => "audio/aiff",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
            Self::Heic => "image/heic",
        }
    }

    /// Derive an encoding from a declared MIME type. Parameters
    /// (`;codecs=opus`) and case are ignored.
    pub fn from_mime(declared: &str) -> Option<Self> {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let encoding = match essence.as_str() {
            "audio/flac" | "audio/x-flac" => Self::Flac,
            "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Self::M4a,
            "audio/mpeg" | "audio/mp3" | "audio/x-mp3" => Self::Mp3,
            "video/mp4" => Self::Mp4,
            "video/mpeg" => Self::Mpeg,
            "audio/mpga" => Self::Mpga,
            "audio/ogg" | "audio/opus" | "application/ogg" => Self::Ogg,
            "audio/oga" => Self::Oga,
            "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => Self::Wav,
            "audio/webm" | "video/webm" => Self::Webm,
            "audio/aac" | "audio/x-aac" => Self::Aac,
            "audio/amr" => Self::Amr,
            "audio/3gpp" | "video/3gpp" => Self::ThreeGp,
            "audio/aiff" | "audio/x-aiff" => Self::Aiff,
            "image/png" => Self::Png,
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Self::Jpeg,
            "image/gif" => Self::Gif,
            "image/webp" => Self::Webp,
            "image/bmp" | "image/x-ms-bmp" => Self::Bmp,
            "image/tiff" => Self::Tiff,
            "image/heic" | "image/heif" => Self::Heic,
            _ => return None,
        };
        Some(encoding)
    }

    /// Derive an encoding from a file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        let encoding = match ext.to_ascii_lowercase().as_str() {
            "flac" => Self::Flac,
            "m4a" => Self::M4a,
            "mp3" => Self::Mp3,
            "mp4" => Self::Mp4,
            "mpeg" => Self::Mpeg,
            "mpga" => Self::Mpga,
            "oga" => Self::Oga,
            "ogg" | "opus" => Self::Ogg,
            "wav" => Self::Wav,
            "webm" => Self::Webm,
            "aac" => Self::Aac,
            "amr" => Self::Amr,
            "3gp" => Self::ThreeGp,
            "aif" | "aiff" => Self::Aiff,
            "png" => Self::Png,
            "jpg" | "jpeg" => Self::Jpeg,
            "gif" => Self::Gif,
            "webp" => Self::Webp,
            "bmp" => Self::Bmp,
            "tif" | "tiff" => Self::Tiff,
            "heic" | "heif" => Self::Heic,
            _ => return None,
        };
        Some(encoding)
    }

    /// Recognise an encoding from the leading bytes of a blob
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let starts = |magic: &[u8]| bytes.starts_with(magic);
        let at = |offset: usize, magic: &[u8]| {
            bytes.len() >= offset + magic.len() && &bytes[offset..offset + magic.len()] == magic
        };

        if starts(b"RIFF") && at(8, b"WAVE") {
            return Some(Self::Wav);
        }
        if starts(b"RIFF") && at(8, b"WEBP") {
            return Some(Self::Webp);
        }
        if starts(b"fLaC") {
            return Some(Self::Flac);
        }
        if starts(b"OggS") {
            return Some(Self::Ogg);
        }
        if starts(b"ID3") || (bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0 && (bytes[1] & 0x06) != 0) {
            return Some(Self::Mp3);
        }
        if bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xF6) == 0xF0 {
            return Some(Self::Aac);
        }
        if at(4, b"ftyp") {
            let brand = bytes.get(8..12).unwrap_or_default();
            return match brand {
                b"M4A " | b"M4B " => Some(Self::M4a),
                b"heic" | b"heix" | b"mif1" | b"msf1" => Some(Self::Heic),
                b"3gp4" | b"3gp5" | b"3gp6" | b"3gg6" => Some(Self::ThreeGp),
                _ => Some(Self::Mp4),
            };
        }
        if starts(&[0x1A, 0x45, 0xDF, 0xA3]) {
            return Some(Self::Webm);
        }
        if starts(b"#!AMR") {
            return Some(Self::Amr);
        }
        if starts(b"FORM") && (at(8, b"AIFF") || at(8, b"AIFC")) {
            return Some(Self::Aiff);
        }
        if starts(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(Self::Png);
        }
        if starts(&[0xFF, 0xD8, 0xFF]) {
            return Some(Self::Jpeg);
        }
        if starts(b"GIF87a") || starts(b"GIF89a") {
            return Some(Self::Gif);
        }
        if starts(b"BM") && bytes.len() > 14 {
            return Some(Self::Bmp);
        }
        if starts(b"II*\0") || starts(b"MM\0*") {
            return Some(Self::Tiff);
        }
        None
    }
}

/// Capture bytes in a whitelisted encoding, ready for a provider call
#[derive(Debug, Clone)]
pub struct NormalizedCapture {
    pub bytes: Vec<u8>,
    pub encoding: Encoding,
    /// True when the bytes came out of the transcoder
    pub transcoded: bool,
}

impl NormalizedCapture {
    pub fn medium(&self) -> Medium {
        self.encoding.medium()
    }

    /// File name used when a provider wants a named upload
    pub fn file_name(&self) -> String {
        format!("capture.{}", self.encoding.extension())
    }
}
