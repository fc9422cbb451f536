// CODECS - Data-driven decoder registration table
//
// One row per hardware decoder. Integrations iterate CODEC_TABLE to register
// "<name>_rkmpp" decoders instead of generating them one by one.

use serde::{Deserialize, Serialize};

use crate::mpp::CodingType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    H263,
    H264,
    Hevc,
    Av1,
    Vp8,
    Vp9,
    Mpeg1,
    Mpeg2,
    Mpeg4,
    Mjpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodecEntry {
    pub id: CodecId,
    pub name: &'static str,
    pub long_name: &'static str,
    /// Bitstream filter the container layer must apply before packets arrive
    pub bitstream_filter: Option<&'static str>,
    pub coding: CodingType,
}

pub static CODEC_TABLE: [CodecEntry; 10] = [
    CodecEntry { id: CodecId::H263, name: "h263", long_name: "H.263", bitstream_filter: None, coding: CodingType::H263 },
    CodecEntry {
        id: CodecId::H264,
        name: "h264",
        long_name: "H.264 / AVC",
        bitstream_filter: Some("h264_mp4toannexb"),
        coding: CodingType::Avc,
    },
    CodecEntry {
        id: CodecId::Hevc,
        name: "hevc",
        long_name: "H.265 / HEVC",
        bitstream_filter: Some("hevc_mp4toannexb"),
        coding: CodingType::Hevc,
    },
    CodecEntry { id: CodecId::Av1, name: "av1", long_name: "AV1", bitstream_filter: None, coding: CodingType::Av1 },
    CodecEntry { id: CodecId::Vp8, name: "vp8", long_name: "VP8", bitstream_filter: None, coding: CodingType::Vp8 },
    CodecEntry { id: CodecId::Vp9, name: "vp9", long_name: "VP9", bitstream_filter: None, coding: CodingType::Vp9 },
    CodecEntry {
        id: CodecId::Mpeg1,
        name: "mpeg1",
        long_name: "MPEG-1 video",
        bitstream_filter: None,
        coding: CodingType::Mpeg2,
    },
    CodecEntry {
        id: CodecId::Mpeg2,
        name: "mpeg2",
        long_name: "MPEG-2 video",
        bitstream_filter: None,
        coding: CodingType::Mpeg2,
    },
    CodecEntry {
        id: CodecId::Mpeg4,
        name: "mpeg4",
        long_name: "MPEG-4 part 2",
        bitstream_filter: Some("mpeg4_unpack_bframes"),
        coding: CodingType::Mpeg4,
    },
    CodecEntry { id: CodecId::Mjpeg, name: "mjpeg", long_name: "Motion JPEG", bitstream_filter: None, coding: CodingType::Mjpeg },
];

impl CodecId {
    pub fn entry(&self) -> &'static CodecEntry {
        // every variant has exactly one row
        CODEC_TABLE.iter().find(|e| e.id == *self).unwrap_or(&CODEC_TABLE[0])
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_suffix("_rkmpp").unwrap_or(name);
        CODEC_TABLE.iter().find(|e| e.name.eq_ignore_ascii_case(name)).map(|e| e.id)
    }

    pub fn coding(&self) -> CodingType {
        self.entry().coding
    }

    /// "h264" -> "h264_rkmpp"
    pub fn decoder_name(&self) -> String {
        format!("{}_rkmpp", self.entry().name)
    }

    /// AV1 hardware cannot parse the sequence header when fed out of band
    pub fn skips_extradata(&self) -> bool {
        *self == CodecId::Av1
    }

    /// MJPEG has no streaming state and is decoded one task at a time
    pub fn uses_task_queue(&self) -> bool {
        *self == CodecId::Mjpeg
    }
}

pub fn table_info() -> serde_json::Value {
    serde_json::Value::Array(
        CODEC_TABLE
            .iter()
            .map(|e| {
                serde_json::json!({
                    "decoder": e.id.decoder_name(),
                    "long_name": format!("Rockchip MPP {} decoder", e.long_name),
                    "bsf": e.bitstream_filter,
                    "coding": format!("{:?}", e.coding),
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_id_has_one_row() {
        for entry in CODEC_TABLE.iter() {
            assert_eq!(CODEC_TABLE.iter().filter(|e| e.id == entry.id).count(), 1);
            assert_eq!(entry.id.entry().name, entry.name);
        }
    }

    #[test]
    fn test_names_and_filters() {
        assert_eq!(CodecId::H264.decoder_name(), "h264_rkmpp");
        assert_eq!(CodecId::from_name("hevc_rkmpp"), Some(CodecId::Hevc));
        assert_eq!(CodecId::from_name("MJPEG"), Some(CodecId::Mjpeg));
        assert_eq!(CodecId::from_name("theora"), None);
        assert_eq!(CodecId::Mpeg4.entry().bitstream_filter, Some("mpeg4_unpack_bframes"));
        assert_eq!(CodecId::Vp9.entry().bitstream_filter, None);
    }

    #[test]
    fn test_mpeg1_shares_mpeg2_coding() {
        assert_eq!(CodecId::Mpeg1.coding(), CodingType::Mpeg2);
        assert_eq!(CodecId::H264.coding(), CodingType::Avc);
        assert!(CodecId::Av1.skips_extradata());
        assert!(!CodecId::Hevc.skips_extradata());
        assert!(CodecId::Mjpeg.uses_task_queue());
    }

    #[test]
    fn test_table_info_lists_all() {
        let info = table_info();
        assert_eq!(info.as_array().map(|a| a.len()), Some(10));
    }
}
