use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use mfmtape_core::{
    default_noise_floor, expected_bit_width, mfm_peak_width, skip_lead_in, wave, BlockDecoder,
    DcOffset, EdgeDetect, EdgeType, PulseClassifier, DEFAULT_BIT_RATE,
};

#[derive(Parser)]
#[command(name = "mfmtape")]
#[command(about = "Decode StudyBox MFM tape recordings from WAVE files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove DC offset and noise from a recording
    Clean {
        /// Input WAV file
        input: PathBuf,

        /// Output WAV file
        #[arg(default_value = "out.wav")]
        output: PathBuf,

        /// Noise floor; -1 means 2% of full scale
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        noise_floor: i32,

        /// Width of a peak in samples; 0 means use the default
        #[arg(long, default_value_t = 0)]
        peak_width: usize,

        /// Output the per-sample offsets instead of the cleaned samples
        #[arg(long)]
        offsets: bool,

        /// Output cleaned samples and offsets as a stereo pair
        #[arg(long)]
        stereo: bool,

        /// Print some statistics
        #[arg(long)]
        stats: bool,
    },

    /// List detected edges, with optional per-duration statistics
    Edges {
        /// Input WAV file
        input: PathBuf,

        /// Write the edge listing to this file (- for stdout)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Write per-duration statistics to this file (- for stdout)
        #[arg(long)]
        stats: Option<PathBuf>,

        /// Noise floor; -1 means 2% of full scale
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        noise_floor: i32,

        /// Max samples for a zero crossing before an edge to none;
        /// -1 derives it from the sample rate
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        max_crossing_time: i64,

        /// Do not clean the input signal first
        #[arg(long)]
        no_clean: bool,
    },

    /// Render the detected edges back into a square wave
    Square {
        /// Input WAV file
        input: PathBuf,

        /// Output WAV file
        #[arg(default_value = "out.wav")]
        output: PathBuf,

        /// Noise floor; -1 means 2% of full scale
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        noise_floor: i32,

        /// Do not clean the input signal first
        #[arg(long)]
        no_clean: bool,
    },

    /// Classify pulses and write the pulse stream as letters
    Classify {
        /// Input WAV file
        input: PathBuf,

        /// Output text file (- for stdout)
        #[arg(default_value = "out.txt")]
        output: PathBuf,

        /// Noise floor; -1 means 2% of full scale
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        noise_floor: i32,

        /// Base bit width; 0 derives it from the sample rate,
        /// -1 uses the lead-in only
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        bit_width: f64,

        /// Do not clean the input signal first
        #[arg(long)]
        no_clean: bool,

        /// Write a detail line for every pulse
        #[arg(long)]
        all: bool,
    },

    /// Decode pulses into MFM bit blocks
    Decode {
        /// Input WAV file
        input: PathBuf,

        /// Noise floor; -1 means 2% of full scale
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        noise_floor: i32,

        /// Base bit width; 0 derives it from the sample rate,
        /// -1 uses the lead-in only
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        bit_width: f64,

        /// Do not clean the input signal first
        #[arg(long)]
        no_clean: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    match Cli::parse().command {
        Commands::Clean {
            input,
            output,
            noise_floor,
            peak_width,
            offsets,
            stereo,
            stats,
        } => cmd_clean(&input, &output, noise_floor, peak_width, offsets, stereo, stats),
        Commands::Edges {
            input,
            out,
            stats,
            noise_floor,
            max_crossing_time,
            no_clean,
        } => cmd_edges(&input, out, stats, noise_floor, max_crossing_time, no_clean),
        Commands::Square {
            input,
            output,
            noise_floor,
            no_clean,
        } => cmd_square(&input, &output, noise_floor, no_clean),
        Commands::Classify {
            input,
            output,
            noise_floor,
            bit_width,
            no_clean,
            all,
        } => cmd_classify(&input, &output, noise_floor, bit_width, no_clean, all),
        Commands::Decode {
            input,
            noise_floor,
            bit_width,
            no_clean,
        } => cmd_decode(&input, noise_floor, bit_width, no_clean),
    }
}

fn load_input(path: &Path) -> Result<(Vec<i32>, wave::WaveMeta), Box<dyn Error>> {
    let (samples, meta) = wave::load_data_channel(path)?;
    let seconds = samples.len() as f64 / meta.sample_rate as f64;
    println!(
        "Input: {} {}-bit samples at {} Hz = {:.3}s",
        samples.len(),
        meta.bit_depth,
        meta.sample_rate,
        seconds
    );
    Ok((samples, meta))
}

fn resolve_noise_floor(arg: i32, bit_depth: u16) -> Result<i32, Box<dyn Error>> {
    if arg >= 0 {
        Ok(arg)
    } else {
        Ok(default_noise_floor(bit_depth)?)
    }
}

fn clean_samples(
    samples: &mut [i32],
    noise_floor: i32,
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let peak_width = mfm_peak_width(DEFAULT_BIT_RATE, sample_rate);
    println!("Cleaning: noise floor {noise_floor}, peak width {peak_width}");
    let mut filter = DcOffset::new(noise_floor, peak_width);
    filter.run_in_place(samples)?;
    Ok(())
}

fn open_text_output(path: &Path) -> Result<Box<dyn Write>, Box<dyn Error>> {
    if path == Path::new("-") {
        Ok(Box::new(BufWriter::new(io::stdout())))
    } else {
        Ok(Box::new(BufWriter::new(File::create(path)?)))
    }
}

fn cmd_clean(
    input: &Path,
    output: &Path,
    noise_floor: i32,
    peak_width: usize,
    offsets: bool,
    stereo: bool,
    stats: bool,
) -> Result<(), Box<dyn Error>> {
    let (samples, meta) = load_input(input)?;
    let noise_floor = resolve_noise_floor(noise_floor, meta.bit_depth)?;
    let peak_width = if peak_width > 0 {
        peak_width
    } else {
        mfm_peak_width(DEFAULT_BIT_RATE, meta.sample_rate)
    };
    println!("Noise floor: {noise_floor}, peak width: {peak_width}");

    if stats {
        let (lo, hi) = min_max(&samples);
        println!("Input sample min: {lo}, max: {hi}");
    }

    let mut cleaned = samples.clone();
    let mut filter = DcOffset::new(noise_floor, peak_width);
    filter.run_in_place(&mut cleaned)?;

    if stats || offsets || stereo {
        let offset_track: Vec<i32> = samples
            .iter()
            .zip(&cleaned)
            .map(|(&s, &c)| (s as i64 - c as i64) as i32)
            .collect();

        if stats {
            let (lo, hi) = min_max(&offset_track);
            let avg: f64 =
                offset_track.iter().map(|&v| v as f64).sum::<f64>() / offset_track.len() as f64;
            println!("Offsets: min: {lo}, max: {hi}, avg: {avg:.3}");
            let (lo, hi) = min_max(&cleaned);
            println!("Output sample min: {lo}, max: {hi}");
        }

        if stereo {
            wave::save_channels(
                output,
                meta.sample_rate,
                meta.bit_depth,
                &[&cleaned, &offset_track],
            )?;
            println!("Wrote cleaned + offsets to {}", output.display());
            return Ok(());
        }
        if offsets {
            wave::save_mono(output, meta.sample_rate, meta.bit_depth, &offset_track)?;
            println!("Wrote offsets to {}", output.display());
            return Ok(());
        }
    }

    wave::save_mono(output, meta.sample_rate, meta.bit_depth, &cleaned)?;
    println!("Wrote cleaned samples to {}", output.display());
    Ok(())
}

fn min_max(samples: &[i32]) -> (i32, i32) {
    samples
        .iter()
        .fold((i32::MAX, i32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Per-duration-bucket statistics, using Knuth's online mean/variance.
#[derive(Debug, Default, Clone, Copy)]
struct StatsGroup {
    count: usize,
    high: usize,
    low: usize,
    none: usize,
    min: f64,
    max: f64,
    mean: f64,
    var_k: f64,
}

impl StatsGroup {
    fn add(&mut self, val: f64, kind: EdgeType) {
        match kind {
            EdgeType::ToHigh => self.high += 1,
            EdgeType::ToLow => self.low += 1,
            EdgeType::None => self.none += 1,
        }
        self.count += 1;
        if self.count == 1 {
            self.min = val;
            self.max = val;
            self.mean = val;
            self.var_k = 0.0;
        } else {
            self.min = self.min.min(val);
            self.max = self.max.max(val);
            let prev_mean = self.mean;
            self.mean += (val - prev_mean) / self.count as f64;
            self.var_k += (val - prev_mean) * (val - self.mean);
        }
    }

    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.var_k / (self.count - 1) as f64
        }
    }

    fn stdev(&self) -> f64 {
        self.variance().sqrt()
    }
}

fn cmd_edges(
    input: &Path,
    out: Option<PathBuf>,
    stats: Option<PathBuf>,
    noise_floor: i32,
    max_crossing_time: i64,
    no_clean: bool,
) -> Result<(), Box<dyn Error>> {
    let (mut samples, meta) = load_input(input)?;
    let noise_floor = resolve_noise_floor(noise_floor, meta.bit_depth)?;
    if !no_clean {
        clean_samples(&mut samples, noise_floor, meta.sample_rate)?;
    }

    let mut ed = EdgeDetect::new(&samples, noise_floor);
    ed.max_crossing_time = if max_crossing_time >= 0 {
        max_crossing_time as usize
    } else {
        // Matches what the DC-offset filter assumes for the input.
        expected_bit_width(DEFAULT_BIT_RATE, meta.sample_rate)?.round() as usize
    };
    println!(
        "Noise floor: {}, max crossing time: {}",
        ed.noise_floor, ed.max_crossing_time
    );

    let mut listing = out.as_deref().map(open_text_output).transpose()?;
    if let Some(w) = listing.as_mut() {
        writeln!(
            w,
            "{:>8} Type {:>10} {:>12} {:>8} {:>10}",
            "Edge", "Sample", "0-crossing", "Size", "Duration"
        )?;
    }

    let mut durations: BTreeMap<i64, StatsGroup> = BTreeMap::new();

    let mut edges = 0usize;
    while ed.advance() {
        edges += 1;
        if let Some(w) = listing.as_mut() {
            writeln!(
                w,
                "{:>8} {}-{}  {:>10} {:>12.3} {:>8} {:>10.3}",
                edges,
                ed.prev.kind,
                ed.cur.kind,
                ed.cur.index,
                ed.cur.zero,
                ed.cur.index - ed.prev.index,
                ed.cur.zero - ed.prev.zero,
            )?;
        }
        if stats.is_some() {
            let dur = ed.cur.zero - ed.prev.zero;
            durations
                .entry(dur as i64)
                .or_default()
                .add(dur, ed.prev.kind);
        }
    }
    if let Some(w) = listing.as_mut() {
        writeln!(
            w,
            "{:>8} {}-{}  {:>10} {:>12.3} {:>8} {:>10.3}",
            "End",
            ed.prev.kind,
            ed.cur.kind,
            ed.cur.index,
            ed.cur.zero,
            ed.cur.index - ed.prev.index,
            ed.cur.zero - ed.prev.zero,
        )?;
        w.flush()?;
    }

    println!("Edges found: {edges}");

    if let Some(path) = stats {
        let mut w = open_text_output(&path)?;
        writeln!(
            w,
            "{:>6} {:>7} {:>7} {:>7} {:>7} {:>10} {:>10} {:>10} {:>10} {:>12}",
            "Group", "High", "Low", "None", "Total", "Min", "Max", "Mean", "StDev", "Variance"
        )?;
        let mut high = 0;
        let mut low = 0;
        let mut none = 0;
        for (bucket, g) in &durations {
            if g.high > 0 {
                high += 1;
            }
            if g.low > 0 {
                low += 1;
            }
            if g.none > 0 {
                none += 1;
            }
            writeln!(
                w,
                "{:>6} {:>7} {:>7} {:>7} {:>7} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>12.3}",
                bucket,
                g.high,
                g.low,
                g.none,
                g.count,
                g.min,
                g.max,
                g.mean,
                g.stdev(),
                g.variance(),
            )?;
        }
        writeln!(
            w,
            "Distinct widths: high {high}, low {low}, none {none}, total {}",
            durations.len()
        )?;
        w.flush()?;
    }

    Ok(())
}

fn cmd_square(
    input: &Path,
    output: &Path,
    noise_floor: i32,
    no_clean: bool,
) -> Result<(), Box<dyn Error>> {
    let (mut samples, meta) = load_input(input)?;
    let noise_floor = resolve_noise_floor(noise_floor, meta.bit_depth)?;
    if !no_clean {
        clean_samples(&mut samples, noise_floor, meta.sample_rate)?;
    }

    let mut ed = EdgeDetect::new(&samples, noise_floor);
    ed.max_crossing_time = expected_bit_width(DEFAULT_BIT_RATE, meta.sample_rate)?.round() as usize;

    // Render the high and low levels at half amplitude.
    let high = 1i32 << (meta.bit_depth - 2);
    let mut out = vec![0i32; samples.len()];
    let mut filled = 0usize;

    let mut fill = |kind: EdgeType, from: usize, to: usize| -> Result<(), Box<dyn Error>> {
        if from != filled {
            return Err(format!("fill did not resume at {filled}, got {from}").into());
        }
        let val = match kind {
            EdgeType::ToHigh => high,
            EdgeType::ToLow => -high,
            EdgeType::None => 0,
        };
        for v in &mut out[from..to] {
            *v = val;
        }
        filled = to;
        Ok(())
    };

    let mut edges = 0usize;
    while ed.advance() {
        edges += 1;
        fill(ed.prev.kind, ed.prev.index, ed.cur.index)?;
    }
    fill(ed.prev.kind, ed.prev.index, ed.cur.index)?;
    if filled != out.len() {
        return Err(format!("only filled {filled} of {} samples", out.len()).into());
    }

    println!("Edges found: {edges}");

    wave::save_mono(output, meta.sample_rate, meta.bit_depth, &out)?;
    println!("Wrote square wave to {}", output.display());
    Ok(())
}

fn cmd_classify(
    input: &Path,
    output: &Path,
    noise_floor: i32,
    bit_width: f64,
    no_clean: bool,
    all: bool,
) -> Result<(), Box<dyn Error>> {
    let (mut samples, meta) = load_input(input)?;
    let noise_floor = resolve_noise_floor(noise_floor, meta.bit_depth)?;
    if !no_clean {
        clean_samples(&mut samples, noise_floor, meta.sample_rate)?;
    }

    let ed = EdgeDetect::new(&samples, noise_floor);
    let mut pc = PulseClassifier::with_sample_rate(ed, DEFAULT_BIT_RATE, meta.sample_rate)?;
    if bit_width == 0.0 {
        pc.set_bit_width(expected_bit_width(DEFAULT_BIT_RATE, meta.sample_rate)?)?;
    } else if bit_width > 0.0 {
        pc.set_bit_width(bit_width)?;
    }
    println!(
        "Noise floor: {}, bit width: {}, max crossing time: {}",
        noise_floor,
        pc.bit_width(),
        pc.edges.max_crossing_time
    );

    let mut out = open_text_output(output)?;
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    if all {
        writeln!(
            out,
            "{:>8} Kind {:>10} {:>10} {:>10} BitWidth",
            "Pulse", "From", "To", "Width"
        )?;
        for i in 0.. {
            if !pc.advance() {
                break;
            }
            *counts.entry(pc.class.to_string()).or_default() += 1;
            writeln!(
                out,
                "{:>8} {}:{}{}  {:>10} {:>10} {:>10.3} {:>8.4}",
                i,
                pc.class,
                pc.edges.prev.kind,
                pc.edges.cur.kind,
                pc.edges.prev.index,
                pc.edges.cur.index,
                pc.width,
                pc.bit_width(),
            )?;
        }
    } else {
        let mut need_newline = false;
        while pc.advance() {
            *counts.entry(pc.class.to_string()).or_default() += 1;
            if pc.class.is_valid() && !pc.touches_none() {
                write!(out, "{}", pc.class)?;
                need_newline = true;
            } else {
                if need_newline {
                    writeln!(out)?;
                    need_newline = false;
                }
                writeln!(
                    out,
                    "-- Class:{} Type:{}-{} From:{} To:{} Width:{:.3} BitWidth:{:.4}",
                    pc.class,
                    pc.edges.prev.kind,
                    pc.edges.cur.kind,
                    pc.edges.prev.index,
                    pc.edges.cur.index,
                    pc.width,
                    pc.bit_width(),
                )?;
            }
        }
        if need_newline {
            writeln!(out)?;
        }
    }
    out.flush()?;

    let total: usize = counts.values().sum();
    println!("Pulses found: {total} ({counts:?})");
    Ok(())
}

fn cmd_decode(
    input: &Path,
    noise_floor: i32,
    bit_width: f64,
    no_clean: bool,
) -> Result<(), Box<dyn Error>> {
    let (mut samples, meta) = load_input(input)?;
    let noise_floor = resolve_noise_floor(noise_floor, meta.bit_depth)?;
    if !no_clean {
        clean_samples(&mut samples, noise_floor, meta.sample_rate)?;
    }

    let ed = EdgeDetect::new(&samples, noise_floor);
    let mut pc = PulseClassifier::with_sample_rate(ed, DEFAULT_BIT_RATE, meta.sample_rate)?;
    if bit_width == 0.0 {
        pc.set_bit_width(expected_bit_width(DEFAULT_BIT_RATE, meta.sample_rate)?)?;
    } else if bit_width > 0.0 {
        pc.set_bit_width(bit_width)?;
    }

    let mut decoder = BlockDecoder::new(pc);
    let mut blocks = 0usize;
    while decoder.next_block()? {
        blocks += 1;
        match skip_lead_in(&decoder.bits) {
            Ok(data) => {
                println!(
                    "block {blocks}: start {}, end {}, bit width {:.4}, lead-in {}: {}",
                    decoder.start_index,
                    decoder.end_index,
                    decoder.classifier().bit_width(),
                    decoder.bits.len() - data.len(),
                    bit_string(data),
                );
            }
            Err(e) => {
                println!(
                    "block {blocks}: start {}, end {}, bit width {:.4}: {}",
                    decoder.start_index,
                    decoder.end_index,
                    decoder.classifier().bit_width(),
                    bit_string(&decoder.bits),
                );
                println!("  Warning: {e}");
            }
        }
    }
    println!("Blocks found: {blocks}");
    Ok(())
}

fn bit_string(bits: &[u8]) -> String {
    bits.iter().map(|b| if *b == 0 { '0' } else { '1' }).collect()
}
