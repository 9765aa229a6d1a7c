//! Launch-spec JSON: formatted with exact field order, matching the
//! reference `launchspec.c`'s `snprintf` template byte-for-byte.

use base64::Engine;

use crate::models::connect_info::{Target, VideoCodec, VideoProfile};

pub struct LaunchSpecParams {
    pub target: Target,
    pub video: VideoProfile,
    pub bw_kbps_sent: u32,
    pub mtu: u32,
    pub rtt: u32,
    pub handshake_key: [u8; 32],
}

/// Formats the launch-spec JSON blob sent during handshake. Field order
/// and literal constants (sessionId, score, appSpecification, konan,
/// userProfile) are fixed and must not be reordered or reformatted —
/// the console parses this as opaque bytes up to a point, but several
/// clients downstream of this one diff against the exact string.
pub fn format_launch_spec(params: &LaunchSpecParams) -> String {
    let handshake_key_b64 = base64::engine::general_purpose::STANDARD.encode(params.handshake_key);

    let (extra_adaptive, extra_codec, extra_dynamic_range) = if params.target.is_ps5() {
        (
            ",\"adaptiveStreamMode\": \"resize\"",
            if params.video.codec.is_h265() {
                "\"videoCodec\":\"hevc\","
            } else {
                "\"videoCodec\":\"avc\","
            },
            if params.video.codec.is_hdr() {
                "\"dynamicRange\":\"HDR\","
            } else {
                "\"dynamicRange\":\"SDR\","
            },
        )
    } else {
        ("", "", "")
    };

    format!(
        concat!(
            "{{",
            "\"sessionId\":\"sessionId4321\",",
            "\"streamResolutions\":[",
            "{{",
            "\"resolution\":",
            "{{",
            "\"width\":{width},",
            "\"height\":{height}",
            "}},",
            "\"maxFps\":{max_fps},",
            "\"score\":10",
            "}}",
            "],",
            "\"network\":{{",
            "\"bwKbpsSent\":{bw_kbps_sent},",
            "\"bwLoss\":0.001000,",
            "\"mtu\":{mtu},",
            "\"rtt\":{rtt},",
            "\"ports\":[53,2053]",
            "}},",
            "\"slotId\":1,",
            "\"appSpecification\":{{",
            "\"minFps\":30,",
            "\"minBandwidth\":0,",
            "\"extTitleId\":\"ps3\",",
            "\"version\":1,",
            "\"timeLimit\":1,",
            "\"startTimeout\":100,",
            "\"afkTimeout\":100,",
            "\"afkTimeoutDisconnect\":100",
            "}},",
            "\"konan\":{{",
            "\"ps3AccessToken\":\"accessToken\",",
            "\"ps3RefreshToken\":\"refreshToken\"",
            "}},\"requestGameSpecification\":{{",
            "\"model\":\"bravia_tv\",",
            "\"platform\":\"android\",",
            "\"audioChannels\":\"5.1\",",
            "\"language\":\"sp\",",
            "\"acceptButton\":\"X\",",
            "\"connectedControllers\":[\"xinput\",\"ds3\",\"ds4\"],",
            "\"yuvCoefficient\":\"bt601\",",
            "\"videoEncoderProfile\":\"hw4.1\",",
            "\"audioEncoderProfile\":\"audio1\"",
            "{extra_adaptive}",
            "}},",
            "\"userProfile\":{{",
            "\"onlineId\":\"psnId\",",
            "\"npId\":\"npId\",",
            "\"region\":\"US\",",
            "\"languagesUsed\":[\"en\",\"jp\"]",
            "}},",
            "{extra_codec}",
            "{extra_dynamic_range}",
            "\"handshakeKey\":\"{handshake_key}\"",
            "}}",
        ),
        width = params.video.width,
        height = params.video.height,
        max_fps = params.video.max_fps,
        bw_kbps_sent = params.bw_kbps_sent,
        mtu = params.mtu,
        rtt = params.rtt,
        extra_adaptive = extra_adaptive,
        extra_codec = extra_codec,
        extra_dynamic_range = extra_dynamic_range,
        handshake_key = handshake_key_b64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(target: Target, codec: VideoCodec) -> LaunchSpecParams {
        LaunchSpecParams {
            target,
            video: VideoProfile {
                width: 1920,
                height: 1080,
                max_fps: 60,
                bitrate: 10000,
                codec,
            },
            bw_kbps_sent: 15000,
            mtu: 1454,
            rtt: 8,
            handshake_key: [0u8; 32],
        }
    }

    #[test]
    fn output_is_valid_json() {
        let spec = format_launch_spec(&params(Target::Ps4, VideoCodec::H264));
        let _: serde_json::Value = serde_json::from_str(&spec).expect("must parse as json");
    }

    #[test]
    fn ps4_omits_codec_and_dynamic_range_fields() {
        let spec = format_launch_spec(&params(Target::Ps4, VideoCodec::H264));
        assert!(!spec.contains("videoCodec"));
        assert!(!spec.contains("dynamicRange"));
        assert!(!spec.contains("adaptiveStreamMode"));
    }

    #[test]
    fn ps5_hevc_hdr_fields_present_in_fixed_order() {
        let spec = format_launch_spec(&params(Target::Ps5, VideoCodec::H265Hdr));
        let codec_pos = spec.find("\"videoCodec\":\"hevc\"").unwrap();
        let range_pos = spec.find("\"dynamicRange\":\"HDR\"").unwrap();
        let key_pos = spec.find("\"handshakeKey\"").unwrap();
        assert!(codec_pos < range_pos);
        assert!(range_pos < key_pos);
    }

    #[test]
    fn re_serializing_same_inputs_is_byte_identical() {
        let a = format_launch_spec(&params(Target::Ps5, VideoCodec::H265));
        let b = format_launch_spec(&params(Target::Ps5, VideoCodec::H265));
        assert_eq!(a, b);
    }
}
