//! Synthetic RTB streams for integration tests.
#![allow(dead_code)]

use ndarray::Array2;
use rtb_adcp::ensemble::{
    encoder, Ancillary, BottomTrack, DatasetRecord, DatasetTag, DecoderConfig, Ensemble,
    EnsembleInfo,
};

/// Serial number of a 4 beam, 20 degree, instrument.
pub const SERIAL: &str = "01300000000000000000000000000001";

/// Description of one synthetic ensemble. Values are chosen to survive the f32 wire
/// encoding exactly.
#[derive(Debug, Clone)]
pub struct Synthetic {
    pub number: u32,
    pub bins: usize,
    pub beams: usize,
    /// Seconds after 2022-06-01 00:00:00
    pub seconds: i32,
    pub heading: f64,
    pub pitch: f64,
    /// As reported by the instrument, 180 is level and down looking.
    pub roll: f64,
    /// Earth velocity (east, north, up, error) of every bin.
    pub velocity: [f64; 4],
    pub amplitude: [f64; 4],
    /// 0 to 1
    pub correlation: f64,
    pub pings: i32,
    /// Bottom range and earth velocity.
    pub bottom_track: Option<(f64, [f64; 4])>,
    /// Latitude, longitude
    pub position: Option<(f64, f64)>,
    pub transducer_depth: f64,
}

impl Synthetic {
    pub fn new(number: u32, bins: usize) -> Self {
        Synthetic {
            number,
            bins,
            beams: 4,
            seconds: number as i32 * 60,
            heading: 90.0,
            pitch: 0.0,
            roll: 180.0,
            velocity: [0.25, -0.125, 0.0625, 0.0],
            amplitude: [100.0; 4],
            correlation: 0.5,
            pings: 4,
            bottom_track: None,
            position: None,
            transducer_depth: 2.5,
        }
    }

    pub fn ensemble(&self) -> Ensemble {
        let info = EnsembleInfo {
            ensemble_number: self.number as i32,
            bin_count: self.bins as i32,
            beam_count: self.beams as i32,
            desired_pings: self.pings,
            actual_pings: self.pings,
            status: 0,
            year: 2022,
            month: 6,
            day: 1,
            hour: self.seconds / 3600,
            minute: self.seconds / 60 % 60,
            second: self.seconds % 60,
            hundredths: 0,
            serial_number: SERIAL.into(),
            firmware: [0, 12, 0, 3],
            subsystem_config: 0,
        };
        let anc = Ancillary {
            first_bin_range: 1.5,
            bin_size: 1.0,
            heading: self.heading,
            pitch: self.pitch,
            roll: self.roll,
            water_temperature: 12.5,
            salinity: 35.0,
            pressure: self.transducer_depth * 10_000.0,
            transducer_depth: self.transducer_depth,
            speed_of_sound: 1500.0,
            ..Default::default()
        };
        let beams = self.beams;
        let per_bin = |v: &[f64; 4]| Array2::from_shape_fn((self.bins, beams), |(_, b)| v[b]);
        let mut records = vec![
            info.to_record(),
            anc.to_record(),
            DatasetRecord::float(DatasetTag::EarthVelocity, per_bin(&self.velocity)),
            DatasetRecord::float(DatasetTag::Amplitude, per_bin(&self.amplitude)),
            DatasetRecord::float(
                DatasetTag::Correlation,
                Array2::from_elem((self.bins, beams), self.correlation),
            ),
            DatasetRecord::float(
                DatasetTag::GoodEarth,
                Array2::from_shape_fn((self.bins, beams), |(_, b)| {
                    if b == 3 {
                        f64::from(self.pings)
                    } else {
                        0.0
                    }
                }),
            ),
        ];
        if let Some((range, velocity)) = self.bottom_track {
            let bt = BottomTrack {
                heading: self.heading,
                pitch: self.pitch,
                roll: self.roll,
                actual_pings: f64::from(self.pings),
                range: vec![range; beams],
                snr: vec![20.0; beams],
                amplitude: vec![80.0; beams],
                correlation: vec![0.75; beams],
                beam_velocity: vec![0.0; beams],
                beam_good: vec![f64::from(self.pings); beams],
                instrument_velocity: vec![0.0; beams],
                instrument_good: vec![f64::from(self.pings); beams],
                earth_velocity: velocity.to_vec(),
                earth_good: vec![f64::from(self.pings); beams],
                ..Default::default()
            };
            records.push(bt.to_record());
        }
        if let Some((lat, lon)) = self.position {
            records.push(DatasetRecord::bytes(DatasetTag::Nmea, gga(lat, lon).into_bytes()));
        }
        Ensemble::from_datasets(self.number, records, &DecoderConfig::default())
    }

    pub fn frame(&self) -> Vec<u8> {
        encoder::encode(&self.ensemble())
    }
}

/// A `$GPGGA` sentence, with checksum, for a position in decimal degrees.
pub fn gga(lat: f64, lon: f64) -> String {
    let dm = |v: f64| {
        let v = v.abs();
        (v.trunc(), (v - v.trunc()) * 60.0)
    };
    let (lat_d, lat_m) = dm(lat);
    let (lon_d, lon_m) = dm(lon);
    let body = format!(
        "GPGGA,000000.00,{:02}{:07.4},{},{:03}{:07.4},{},1,08,0.9,0.0,M,0.0,M,,",
        lat_d as u32,
        lat_m,
        if lat < 0.0 { "S" } else { "N" },
        lon_d as u32,
        lon_m,
        if lon < 0.0 { "W" } else { "E" },
    );
    let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${body}*{sum:02X}\r\n")
}

/// Frames for ensembles `first..first + count`, each with `bins` bins, concatenated.
pub fn stream(first: u32, count: u32, bins: usize) -> Vec<u8> {
    (first..first + count)
        .flat_map(|n| Synthetic::new(n, bins).frame())
        .collect()
}

/// Concatenated frames of `ensembles`.
pub fn frames(ensembles: &[Synthetic]) -> Vec<u8> {
    ensembles.iter().flat_map(Synthetic::frame).collect()
}
