use std::fmt;

pub enum TimecodeSampleDescriptionFlags {
    DropFrame = 0x0001,
    WrapsAt24Hours = 0x0002,
    NegativeTimesOk = 0x0004,
    Counter = 0x0008,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TimecodeSampleDescriptionDataEntry {
    pub data_format: u32,
    pub reserved: [u8; 6],
    pub data_reference_index: u16,
    pub reserved2: u32,
    pub flags: u32,
    pub time_scale: u32,
    pub frame_duration: u32,
    pub number_of_frames: u8,
    pub reserved3: u8,
}

impl TimecodeSampleDescriptionDataEntry {
    /// Describes a frame counter running at `time_scale / frame_duration` frames per second.
    pub fn new(time_scale: u32, frame_duration: u32) -> Self {
        let fps = time_scale as f64 / frame_duration.max(1) as f64;
        let flags = if fps.round() != fps {
            TimecodeSampleDescriptionFlags::DropFrame as u32 | TimecodeSampleDescriptionFlags::WrapsAt24Hours as u32
        } else {
            TimecodeSampleDescriptionFlags::WrapsAt24Hours as u32
        };
        Self {
            data_format: u32::from_be_bytes(*b"tmcd"),
            reserved: [0; 6],
            data_reference_index: 1,
            reserved2: 0,
            flags,
            time_scale,
            frame_duration,
            number_of_frames: fps.round() as u8,
            reserved3: 0,
        }
    }

    pub fn parse_sample_data(&self, data: u32) -> TimecodeSample {
        // Samples seem to always be counters instead of timecode records despite what the docs
        // say. FFMpeg makes the same assumption.
        TimecodeSample::Counter(data)
    }

    pub fn fps(&self) -> f64 {
        self.time_scale as f64 / self.frame_duration as f64
    }

    pub fn add_frames_to_sample(&self, sample: TimecodeSample, frames: i64) -> TimecodeSample {
        match sample {
            TimecodeSample::Counter(ticks) => {
                let wrap = if (self.flags & TimecodeSampleDescriptionFlags::WrapsAt24Hours as u32) != 0 {
                    self.time_scale as i64 * 60 * 60 * 24 / self.frame_duration.max(1) as i64
                } else {
                    0xffffffff
                };
                let ticks = if (self.flags & TimecodeSampleDescriptionFlags::Counter as u32) != 0 {
                    ticks as i64 + frames / self.number_of_frames.max(1) as i64
                } else {
                    ticks as i64 + frames
                };
                TimecodeSample::Counter(ticks.rem_euclid(wrap) as u32)
            }
            TimecodeSample::Timecode(tc) => {
                let fps = self.fps();
                let mut new_frame_number = tc.frame_number(fps) + frames;
                if (self.flags & TimecodeSampleDescriptionFlags::WrapsAt24Hours as u32) != 0 {
                    new_frame_number = new_frame_number.rem_euclid((fps * 60.0 * 60.0 * 24.0).round() as i64);
                }
                TimecodeSample::Timecode(Timecode::from_frame_number(new_frame_number, fps))
            }
        }
    }

    /// Converts a sample to a timecode for display.
    pub fn timecode(&self, sample: &TimecodeSample) -> Timecode {
        match sample {
            TimecodeSample::Counter(frames) => Timecode::from_frame_number(*frames as i64, self.fps()),
            TimecodeSample::Timecode(tc) => tc.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TimecodeSample {
    Counter(u32),
    Timecode(Timecode),
}

impl TimecodeSample {
    pub fn data(&self) -> u32 {
        match self {
            Self::Counter(ticks) => *ticks,
            Self::Timecode(tc) => {
                ((tc.hours as u32) << 24)
                    | (if tc.negative { 0x800000 } else { 0 })
                    | ((tc.minutes as u32) << 16)
                    | ((tc.seconds as u32) << 8)
                    | tc.frames as u32
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Timecode {
    pub negative: bool,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:02}:{:02}:{:02}:{:02}",
            if self.negative { "-" } else { "" },
            self.hours,
            self.minutes,
            self.seconds,
            self.frames
        )
    }
}

impl Timecode {
    pub fn frame_number(&self, fps: f64) -> i64 {
        let abs_number = if fps.round() != fps {
            let minutes = self.hours as u64 * 60 + self.minutes as u64;
            let ten_minutes = minutes / 10;
            let rem_minutes = minutes % 10;
            let fp10m = (fps * 600.0).round() as u64;
            let fps = ((fp10m as f64) / 600.0).ceil() as u64;
            let dropped_per_minute = (fps * 600 - fp10m) / 9;
            ten_minutes * fp10m + rem_minutes * (fps * 60 - dropped_per_minute) + self.seconds as u64 * fps + self.frames as u64
        } else {
            ((self.hours as u64 * 60 + self.minutes as u64) * 60 + self.seconds as u64) * fps as u64 + self.frames as u64
        };
        if self.negative {
            -(abs_number as i64)
        } else {
            abs_number as i64
        }
    }

    pub fn from_frame_number(n: i64, fps: f64) -> Timecode {
        let abs_number = n.unsigned_abs();
        if fps.round() != fps {
            let fp10m = (fps * 600.0).round() as u64;
            let ten_minutes = abs_number / fp10m;
            let abs_number = abs_number % fp10m;

            let fps = ((fp10m as f64) / 600.0).ceil() as u64;
            let dropped_per_minute = (fps * 600 - fp10m) / 9;
            let fpm = fps * 60 - dropped_per_minute;
            let minutes = if abs_number > dropped_per_minute {
                (abs_number - dropped_per_minute) / fpm
            } else {
                abs_number / fpm
            };
            let abs_number = if minutes == 0 {
                abs_number
            } else {
                (abs_number - dropped_per_minute) % fpm + dropped_per_minute
            };

            Timecode {
                negative: n < 0,
                hours: (ten_minutes / 6) as _,
                minutes: ((ten_minutes % 6) * 10 + minutes) as _,
                seconds: (abs_number / fps) as _,
                frames: (abs_number % fps) as _,
            }
        } else {
            let fps = fps as u64;
            let fpm = fps * 60;
            let fph = fpm * 60;
            Timecode {
                negative: n < 0,
                hours: (abs_number / fph) as _,
                minutes: ((abs_number / fpm) % 60) as _,
                seconds: ((abs_number / fps) % 60) as _,
                frames: (abs_number % fps) as _,
            }
        }
    }
}
