#[macro_use]
extern crate log;
extern crate simplelog;

use std::sync::Arc;

use simplelog::*;
use time::macros::format_description;

use vblk_bench::config::*;
use vblk_bench::file::FileDevice;
use vblk_bench::geometry::Geometry;
use vblk_bench::sim::SimDevice;
use vblk_bench::{execute, BenchReport, Result};

fn main() {
    let log_cfg = ConfigBuilder::new()
        .set_time_format_custom(format_description!("[hour]:[minute]:[second].[subsecond]"))
        .build();

    if let Err(e) = SimpleLogger::init(LevelFilter::Info, log_cfg) {
        eprintln!("logger: {}", e);
    }

    let cfg = BenchConfig::default();
    match bench(&cfg) {
        Ok(report) => {
            for role in [report.write, report.read].into_iter().flatten() {
                println!("{}", role);
            }
        }
        Err(e) => {
            error!("FAILED: {}", e);
            std::process::exit(1);
        }
    }
}

fn bench(cfg: &BenchConfig) -> Result<BenchReport> {
    match &cfg.backend {
        Backend::Simulated => {
            let geo = Geometry {
                nchannels: NCHANNELS,
                nluns: NLUNS,
                blocks_per_unit: NR_BLOCKS,
                unit_block_bytes: UNIT_BLOCK_BYTES,
            };
            info!("simulated device: {:?}", geo);
            execute(Arc::new(SimDevice::new(geo)), cfg)
        }
        Backend::File(path) => {
            info!("opening {}", path.display());
            let dev = FileDevice::open(path, NCHANNELS, NLUNS, UNIT_BLOCK_BYTES)?;
            execute(Arc::new(dev), cfg)
        }
    }
}
