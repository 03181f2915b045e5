//! The save-file wire format (spec.md C7): a little-endian framing of
//! averaged and distribution run records, grounded on `Input::
//! readSingleRun` in `original_source/src/input.cc` and the protocol
//! comment at the top of `original_source/src/input.h`.
//!
//! ```text
//! u32      run id
//! u32      n_avg
//! n_avg *  { u32 n_idx, u32 name_len, u8[name_len] name,
//!            n_idx * { u32 metric_idx, f64 sample } }
//! u32      n_dst
//! n_dst *  { u32 n_idx, u32 name_len, u8[name_len] name,
//!            f64 bin_size, f64 dist_lower, u32 n_bins,
//!            n_idx * { u32 metric_idx, n_bins * f64 sample } }
//! ```

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// Matches the original `#define MAX_METRIC_NAME 1024`: a name longer
/// than this marks the record (and everything after it) as corrupt.
pub const MAX_METRIC_NAME: u32 = 1024;

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// One `(index, sample)` pair of an averaged metric.
#[derive(Debug)]
pub struct AvgSample {
    pub idx: u32,
    pub value: f64,
}

/// One averaged metric's worth of samples within a run record.
#[derive(Debug)]
pub struct AvgMetric {
    pub name: String,
    pub samples: Vec<AvgSample>,
}

/// One distribution metric's worth of bins within a run record: for
/// each index, `n_bins` consecutive samples, one per bin.
#[derive(Debug)]
pub struct DstMetric {
    pub name: String,
    pub bin_size: f64,
    pub dist_lower: f64,
    pub n_bins: u32,
    /// `(index, bin samples)`, `bin samples.len() == n_bins`.
    pub indices: Vec<(u32, Vec<f64>)>,
}

/// One fully decoded run record.
#[derive(Debug)]
pub struct RunRecord {
    pub run_id: u32,
    pub avg: Vec<AvgMetric>,
    pub dst: Vec<DstMetric>,
}

/// Reads one run record from `input`, optionally mirroring the exact
/// bytes consumed to `mirror` (the save-file append path). Returns
/// `Ok(None)` on a clean end-of-stream before any byte of a new record
/// is read — the one point at which EOF does not mean corruption,
/// matching `readSingleRun`'s `is.eof()` short-circuit on the run-id
/// read.
pub fn read_run<R: Read, W: Write>(
    input: &mut R,
    mut mirror: Option<&mut W>,
) -> Result<Option<RunRecord>> {
    let mut run_id_buf = [0u8; 4];
    let first = input.read(&mut run_id_buf[..1])?;
    if first == 0 {
        return Ok(None);
    }
    input
        .read_exact(&mut run_id_buf[1..])
        .map_err(|_| Error::corrupt("truncated run id"))?;
    let run_id = u32::from_le_bytes(run_id_buf);
    if let Some(w) = mirror.as_deref_mut() {
        w.write_all(&run_id_buf)?;
    }

    let n_avg = read_u32(input)?;
    mirror_u32(mirror.as_deref_mut(), n_avg)?;

    let mut avg = Vec::with_capacity(n_avg as usize);
    for _ in 0..n_avg {
        avg.push(read_avg_metric(input, mirror.as_deref_mut())?);
    }

    let n_dst = read_u32(input)?;
    mirror_u32(mirror.as_deref_mut(), n_dst)?;

    let mut dst = Vec::with_capacity(n_dst as usize);
    for _ in 0..n_dst {
        dst.push(read_dst_metric(input, mirror.as_deref_mut())?);
    }

    if let Some(w) = mirror {
        w.flush()?;
    }

    Ok(Some(RunRecord { run_id, avg, dst }))
}

fn mirror_u32<W: Write>(mirror: Option<&mut W>, v: u32) -> io::Result<()> {
    if let Some(w) = mirror {
        write_u32(w, v)?;
    }
    Ok(())
}

fn read_name<R: Read, W: Write>(input: &mut R, mut mirror: Option<&mut W>) -> Result<String> {
    let len = read_u32(input)?;
    mirror_u32(mirror.as_deref_mut(), len)?;
    if len > MAX_METRIC_NAME {
        return Err(Error::corrupt(format!(
            "metric name length {len} exceeds MAX_METRIC_NAME ({MAX_METRIC_NAME})"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    input.read_exact(&mut buf)?;
    if let Some(w) = mirror {
        w.write_all(&buf)?;
    }
    // Trailing NUL is part of the wire length, as in the original.
    while buf.last() == Some(&0) {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| Error::corrupt("metric name is not valid UTF-8"))
}

fn read_avg_metric<R: Read, W: Write>(
    input: &mut R,
    mut mirror: Option<&mut W>,
) -> Result<AvgMetric> {
    let n_idx = read_u32(input)?;
    mirror_u32(mirror.as_deref_mut(), n_idx)?;
    let name = read_name(input, mirror.as_deref_mut())?;

    let mut samples = Vec::with_capacity(n_idx as usize);
    for _ in 0..n_idx {
        let idx = read_u32(input)?;
        mirror_u32(mirror.as_deref_mut(), idx)?;
        let value = read_f64(input)?;
        if let Some(w) = mirror.as_deref_mut() {
            write_f64(w, value)?;
        }
        samples.push(AvgSample { idx, value });
    }
    Ok(AvgMetric { name, samples })
}

fn read_dst_metric<R: Read, W: Write>(
    input: &mut R,
    mut mirror: Option<&mut W>,
) -> Result<DstMetric> {
    let n_idx = read_u32(input)?;
    mirror_u32(mirror.as_deref_mut(), n_idx)?;
    let name = read_name(input, mirror.as_deref_mut())?;

    let bin_size = read_f64(input)?;
    let dist_lower = read_f64(input)?;
    if let Some(w) = mirror.as_deref_mut() {
        write_f64(w, bin_size)?;
        write_f64(w, dist_lower)?;
    }

    let n_bins = read_u32(input)?;
    mirror_u32(mirror.as_deref_mut(), n_bins)?;

    let mut indices = Vec::with_capacity(n_idx as usize);
    for _ in 0..n_idx {
        let idx = read_u32(input)?;
        mirror_u32(mirror.as_deref_mut(), idx)?;
        let mut bins = Vec::with_capacity(n_bins as usize);
        for _ in 0..n_bins {
            let x = read_f64(input)?;
            if let Some(w) = mirror.as_deref_mut() {
                write_f64(w, x)?;
            }
            bins.push(x);
        }
        indices.push((idx, bins));
    }

    Ok(DstMetric { name, bin_size, dist_lower, n_bins, indices })
}

/// Writes a run record in the same framing `read_run` decodes. Used by
/// `ingest::recover` to rewrite the truncated save file.
pub fn write_run<W: Write>(out: &mut W, run: &RunRecord) -> io::Result<()> {
    write_u32(out, run.run_id)?;

    write_u32(out, run.avg.len() as u32)?;
    for metric in &run.avg {
        write_u32(out, metric.samples.len() as u32)?;
        write_name(out, &metric.name)?;
        for s in &metric.samples {
            write_u32(out, s.idx)?;
            write_f64(out, s.value)?;
        }
    }

    write_u32(out, run.dst.len() as u32)?;
    for metric in &run.dst {
        write_u32(out, metric.indices.len() as u32)?;
        write_name(out, &metric.name)?;
        write_f64(out, metric.bin_size)?;
        write_f64(out, metric.dist_lower)?;
        write_u32(out, metric.n_bins)?;
        for (idx, bins) in &metric.indices {
            write_u32(out, *idx)?;
            for x in bins {
                write_f64(out, *x)?;
            }
        }
    }
    out.flush()
}

fn write_name<W: Write>(out: &mut W, name: &str) -> io::Result<()> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    write_u32(out, bytes.len() as u32)?;
    out.write_all(&bytes)
}

/// Decodes and discards one run record without materializing its
/// samples — the duplicate-run-id fast path in `readSingleRun`, which
/// still has to walk the byte layout to find the next record.
pub fn skip_run<R: Read>(input: &mut R) -> Result<bool> {
    match read_run::<R, io::Sink>(input, None)? {
        Some(_) => Ok(true),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_record(run_id: u32) -> RunRecord {
        RunRecord {
            run_id,
            avg: vec![AvgMetric {
                name: "latency".to_string(),
                samples: vec![AvgSample { idx: 0, value: 1.5 }],
            }],
            dst: vec![DstMetric {
                name: "queue_len".to_string(),
                bin_size: 1.0,
                dist_lower: 0.0,
                n_bins: 2,
                indices: vec![(0, vec![0.25, 0.75])],
            }],
        }
    }

    #[test]
    fn round_trips_a_run_record() {
        let mut buf = Vec::new();
        write_run(&mut buf, &sample_record(7)).unwrap();

        let mut cursor = Cursor::new(buf);
        let run = read_run::<_, io::Sink>(&mut cursor, None).unwrap().unwrap();
        assert_eq!(run.run_id, 7);
        assert_eq!(run.avg[0].name, "latency");
        assert_eq!(run.avg[0].samples[0].value, 1.5);
        assert_eq!(run.dst[0].indices[0].1, vec![0.25, 0.75]);
    }

    #[test]
    fn clean_eof_before_any_record_is_not_an_error() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let run = read_run::<_, io::Sink>(&mut cursor, None).unwrap();
        assert!(run.is_none());
    }

    #[test]
    fn truncated_mid_record_is_corrupt() {
        let mut buf = Vec::new();
        write_run(&mut buf, &sample_record(1)).unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = Cursor::new(buf);
        let err = read_run::<_, io::Sink>(&mut cursor, None).unwrap_err();
        assert!(matches!(err, Error::Io { .. } | Error::Corrupt { .. }));
    }

    #[test]
    fn oversized_name_length_is_corrupt() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 1).unwrap(); // run id
        write_u32(&mut buf, 1).unwrap(); // n_avg
        write_u32(&mut buf, 1).unwrap(); // n_idx
        write_u32(&mut buf, MAX_METRIC_NAME + 1).unwrap(); // name_len

        let mut cursor = Cursor::new(buf);
        let err = read_run::<_, io::Sink>(&mut cursor, None).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }

    #[test]
    fn mirrors_to_the_output_writer() {
        let mut mirror = Vec::new();
        let mut buf = Vec::new();
        write_run(&mut buf, &sample_record(3)).unwrap();

        let mut cursor = Cursor::new(buf.clone());
        read_run(&mut cursor, Some(&mut mirror)).unwrap();
        assert_eq!(mirror, buf);
    }
}
