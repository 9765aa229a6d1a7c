//! Parameters needed to start a session, gathered from discovery/registration.

/// Which console family we're talking to — wire formats diverge in a
/// handful of places (discovery port, launch-spec extras, mic header size).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Ps4,
    Ps5,
}

impl Target {
    pub fn is_ps5(self) -> bool {
        matches!(self, Target::Ps5)
    }

    pub fn discovery_port(self) -> u16 {
        match self {
            Target::Ps4 => 987,
            Target::Ps5 => 9302,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
    H265Hdr,
}

impl VideoCodec {
    pub fn is_h265(self) -> bool {
        matches!(self, VideoCodec::H265 | VideoCodec::H265Hdr)
    }

    pub fn is_hdr(self) -> bool {
        matches!(self, VideoCodec::H265Hdr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub max_fps: u32,
    pub bitrate: u32,
    pub codec: VideoCodec,
}

/// Everything a session needs to connect, independent of how it was
/// obtained (manual entry, discovery response, saved registration).
#[derive(Debug, Clone)]
pub struct ConnectInfo {
    pub target: Target,
    pub host: String,
    /// 8-byte console-assigned id, zero-padded to 16 bytes on the wire.
    pub regist_key: [u8; 16],
    /// 16-byte root session key from registration.
    pub morning: [u8; 16],
    pub login_pin: Option<String>,
    pub video_profile: VideoProfile,
    pub enable_keyboard: bool,
    pub enable_dualsense: bool,
    /// 8-byte PSN account id.
    pub psn_account_id: [u8; 8],
}

impl ConnectInfo {
    pub fn ps5(self) -> bool {
        self.target.is_ps5()
    }
}
