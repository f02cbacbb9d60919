//! End-to-end throughput benchmark: streams a synthetic sweep through the
//! full controller → producer → worker path and reports render latency.

fn main() {
    if let Err(e) = run() {
        eprintln!("stream_bench failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use serde::Serialize;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use waterfall_core::{
        worker::DiagnosticsSnapshot, BufferSource, PipelineConfig, PipelineController,
        SpectrogramOptions,
    };

    #[derive(Debug)]
    struct Args {
        sample_rate: u32,
        duration_secs: f64,
        window_size: usize,
        window_overlap: usize,
        iterations: usize,
        output: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct CaseResult {
        iteration: usize,
        elapsed_ms: f64,
        columns: u32,
        realtime_factor: f64,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        sample_rate: u32,
        duration_secs: f64,
        window_size: usize,
        window_overlap: usize,
        iterations: usize,
        p50_elapsed_ms: f64,
        p95_elapsed_ms: f64,
        avg_elapsed_ms: f64,
        avg_realtime_factor: f64,
        diagnostics: DiagnosticsSnapshot,
        cases: Vec<CaseResult>,
    }

    fn parse_args() -> Result<Args, String> {
        let mut args = Args {
            sample_rate: 44_100,
            duration_secs: 30.0,
            window_size: 1024,
            window_overlap: 512,
            iterations: 3,
            output: None,
        };

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--sample-rate" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --sample-rate".into());
                    };
                    args.sample_rate = v
                        .parse()
                        .map_err(|_| "invalid value for --sample-rate".to_string())?;
                }
                "--duration" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --duration".into());
                    };
                    args.duration_secs = v
                        .parse()
                        .map_err(|_| "invalid value for --duration".to_string())?;
                }
                "--window" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --window".into());
                    };
                    args.window_size = v
                        .parse()
                        .map_err(|_| "invalid value for --window".to_string())?;
                }
                "--overlap" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --overlap".into());
                    };
                    args.window_overlap = v
                        .parse()
                        .map_err(|_| "invalid value for --overlap".to_string())?;
                }
                "--iterations" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --iterations".into());
                    };
                    args.iterations = v
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --iterations".to_string())?
                        .clamp(1, 20);
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    args.output = Some(PathBuf::from(v));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p waterfall-core --bin stream_bench -- \\
  [--sample-rate <hz>] [--duration <secs>] [--window <n>] [--overlap <n>] \\
  [--iterations <n>] [--output <file.json>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }
        Ok(args)
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted[idx]
    }

    /// Linear sweep from 40 Hz up to Nyquist, so every output row gets
    /// painted at some point along the stream.
    fn sweep(sample_rate: u32, duration_secs: f64) -> Vec<f32> {
        let total = (sample_rate as f64 * duration_secs) as usize;
        let f0 = 40.0f64;
        let f1 = sample_rate as f64 / 2.0;
        let mut phase = 0.0f64;
        let mut samples = Vec::with_capacity(total);
        for i in 0..total {
            let t = i as f64 / total as f64;
            let freq = f0 + (f1 - f0) * t;
            phase += std::f64::consts::TAU * freq / sample_rate as f64;
            samples.push((phase.sin() * 0.8) as f32);
        }
        samples
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = parse_args()?;
    let options = SpectrogramOptions {
        window_size: args.window_size,
        window_overlap: args.window_overlap,
        ..SpectrogramOptions::default()
    };
    options.validate().map_err(|e| e.to_string())?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
    let summary = runtime.block_on(async {
        let controller = PipelineController::new(PipelineConfig::default());
        let source = Arc::new(BufferSource::new(
            sweep(args.sample_rate, args.duration_secs),
            args.sample_rate,
        ));

        let mut cases = Vec::with_capacity(args.iterations);
        for iteration in 0..args.iterations {
            let start = Instant::now();
            if iteration == 0 {
                controller
                    .connect(Arc::clone(&source) as _, options)
                    .await
                    .map_err(|e| e.to_string())?;
            } else {
                controller
                    .regenerate_spectrogram(options)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            controller
                .wait_until_complete(Duration::from_secs(600))
                .await
                .map_err(|e| e.to_string())?;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1_000.0;

            let columns = controller
                .surface()
                .map_err(|e| e.to_string())?
                .lock()
                .width();
            cases.push(CaseResult {
                iteration,
                elapsed_ms,
                columns,
                realtime_factor: args.duration_secs * 1_000.0 / elapsed_ms,
            });
            eprintln!(
                "iteration {iteration}: {elapsed_ms:.1} ms, {columns} columns, {:.1}x realtime",
                args.duration_secs * 1_000.0 / elapsed_ms
            );
        }

        let mut sorted: Vec<f64> = cases.iter().map(|c| c.elapsed_ms).collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;

        Ok::<Summary, String>(Summary {
            sample_rate: args.sample_rate,
            duration_secs: args.duration_secs,
            window_size: args.window_size,
            window_overlap: args.window_overlap,
            iterations: args.iterations,
            p50_elapsed_ms: percentile(&sorted, 0.50),
            p95_elapsed_ms: percentile(&sorted, 0.95),
            avg_elapsed_ms: avg,
            avg_realtime_factor: cases.iter().map(|c| c.realtime_factor).sum::<f64>()
                / cases.len() as f64,
            diagnostics: controller.diagnostics_snapshot(),
            cases,
        })
    })?;

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(path) = &args.output {
        std::fs::write(path, &json).map_err(|e| e.to_string())?;
        eprintln!("summary written to {}", path.display());
    } else {
        println!("{json}");
    }
    Ok(())
}
