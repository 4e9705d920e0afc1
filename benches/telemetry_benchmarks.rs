use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use hab_logger::{
    gps::nmea::parse_sentence,
    sensors::dht22::{decode_frame, decode_pulses},
    BaroReading, ClimateReading, FixMode, GpsFix, NmeaReader, ReadingCell, TelemetryRecord,
};
use std::hint::black_box;
use std::io::Cursor;

const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
const GSV: &str = "$GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00*74";

/// Benchmark single sentence parsing
fn bench_nmea_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("nmea_parse");
    for (name, line) in [("gga", GGA), ("rmc", RMC), ("gsv", GSV)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), line, |b, line| {
            b.iter(|| parse_sentence(black_box(line)))
        });
    }
    group.finish();
}

/// Benchmark scanning a stream for a GGA/RMC pair
fn bench_nmea_fix(c: &mut Criterion) {
    let mut stream = String::new();
    for _ in 0..8 {
        stream.push_str(GSV);
        stream.push_str("\r\n");
    }
    stream.push_str(GGA);
    stream.push_str("\r\n");
    stream.push_str(RMC);
    stream.push_str("\r\n");

    c.bench_function("nmea_read_fix", |b| {
        b.iter(|| {
            let mut reader = NmeaReader::new(Cursor::new(stream.as_bytes()));
            reader.read_fix().expect("Should find a fix")
        })
    });
}

/// Benchmark DHT22 pulse and frame decoding
fn bench_dht22_decode(c: &mut Criterion) {
    let frame = [0x02u8, 0x8C, 0x01, 0x5F, 0xEE];
    let mut pulses = vec![80u32];
    for byte in frame {
        for bit in (0..8).rev() {
            pulses.push(if byte >> bit & 1 == 1 { 70 } else { 26 });
        }
    }

    c.bench_function("dht22_decode", |b| {
        b.iter(|| decode_frame(decode_pulses(black_box(&pulses)).expect("Should decode pulses")))
    });
}

/// Benchmark CSV row formatting
fn bench_csv_row(c: &mut Criterion) {
    let record = TelemetryRecord {
        iteration: 1234,
        gps: Some(GpsFix {
            mode: FixMode::ThreeD,
            time: Some(chrono::Utc::now()),
            latitude: Some(35.2271),
            longitude: Some(-80.8431),
            altitude_m: Some(24512.7),
            speed_mps: Some(11.3),
            satellites_used: 9,
            ..GpsFix::default()
        }),
        climate: Some(ClimateReading {
            temperature_c: -38.4,
            humidity: 2.1,
        }),
        baro: Some(BaroReading {
            pressure_hpa: 28.731,
            temperature_c: -12.25,
            altitude_m: 24390.118,
        }),
    };

    c.bench_function("csv_row", |b| b.iter(|| black_box(&record).to_csv_row()));
}

/// Benchmark publishing and reading the latest value
fn bench_reading_cell(c: &mut Criterion) {
    let cell = ReadingCell::new();
    let handle = cell.handle();
    cell.publish(ClimateReading {
        temperature_c: 20.0,
        humidity: 40.0,
    });

    c.bench_function("reading_cell_latest", |b| b.iter(|| handle.latest()));
    c.bench_function("reading_cell_publish", |b| {
        b.iter(|| {
            cell.publish(black_box(ClimateReading {
                temperature_c: 20.0,
                humidity: 40.0,
            }))
        })
    });
}

criterion_group!(
    benches,
    bench_nmea_parse,
    bench_nmea_fix,
    bench_dht22_decode,
    bench_csv_row,
    bench_reading_cell
);
criterion_main!(benches);
