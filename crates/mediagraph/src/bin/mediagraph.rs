//! Mediagraph demo binary
//!
//! Builds a two-node graph (a driving sink clocking a tone source), runs a
//! few cycles on the data loop thread from a timer, then tears it down.
//! Also loads the configured codec factories from a built-in plugin table.
//!
//! Usage: `mediagraph [config.toml]`

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use mediaconf::MediaConfig;
use mediagraph::codecs::{Codec, CodecInterface, CodecKind, CodecSet, PluginHandle, PluginLoader};
use mediagraph::properties::{MEDIA_CLASS, NODE_DRIVER};
use mediagraph::{
    Completion, Direction, Engine, EngineConfig, ImplError, NodeCommand, NodeImplementation,
    NodeState, Param, PortCounts, PortInfo, ProcessStatus, Processor, Properties, Quantum,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEMO_CYCLES: usize = 8;

/// Counts frames it was asked to produce.
#[derive(Default)]
struct FrameCounter {
    frames: AtomicU64,
}

impl Processor for FrameCounter {
    fn process(&self, quantum: &Quantum) -> ProcessStatus {
        self.frames
            .fetch_add(u64::from(quantum.size), Ordering::Relaxed);
        ProcessStatus::Done
    }
}

/// Fixed-port implementation used for both demo nodes.
struct DemoNode {
    inputs: u32,
    outputs: u32,
    class: &'static str,
    processor: Arc<FrameCounter>,
}

impl NodeImplementation for DemoNode {
    fn send_command(&mut self, command: NodeCommand) -> Result<Completion, ImplError> {
        debug!(class = self.class, ?command, "command");
        Ok(Completion::Done)
    }

    fn port_counts(&self) -> Result<PortCounts, ImplError> {
        Ok(PortCounts {
            n_input: self.inputs,
            max_input: self.inputs,
            n_output: self.outputs,
            max_output: self.outputs,
        })
    }

    fn port_ids(&self, direction: Direction) -> Result<Vec<u32>, ImplError> {
        let n = match direction {
            Direction::Input => self.inputs,
            Direction::Output => self.outputs,
        };
        Ok((0..n).collect())
    }

    fn port_info(&self, _direction: Direction, _port_id: u32) -> Result<PortInfo, ImplError> {
        Ok(PortInfo::default())
    }

    fn port_clear_format(&mut self, _direction: Direction, _port_id: u32) -> Result<(), ImplError> {
        Ok(())
    }

    fn enum_params(&self, _param_id: u32, _index: &mut u32) -> Result<Option<Param>, ImplError> {
        Ok(None)
    }

    fn properties(&self) -> Option<Properties> {
        let mut props = Properties::new();
        props.set(MEDIA_CLASS, self.class);
        Some(props)
    }

    fn processor(&self) -> Option<Arc<dyn Processor>> {
        Some(self.processor.clone() as Arc<dyn Processor>)
    }
}

/// Plugin table standing in for shared objects on disk.
struct BuiltinPlugins;

struct BuiltinPlugin {
    factory: String,
    codecs: Vec<Arc<Codec>>,
}

impl CodecInterface for BuiltinPlugin {
    fn version(&self) -> u32 {
        mediagraph::codecs::CODEC_ABI_VERSION
    }

    fn codecs(&self) -> Vec<Arc<Codec>> {
        self.codecs.clone()
    }
}

impl PluginHandle for BuiltinPlugin {
    fn factory_name(&self) -> &str {
        &self.factory
    }

    fn codec_interface(&self) -> Option<&dyn CodecInterface> {
        Some(self as &dyn CodecInterface)
    }
}

impl PluginLoader for BuiltinPlugins {
    fn load(&self, factory: &str) -> Option<Box<dyn PluginHandle>> {
        let codecs = match factory {
            "codec.sbc" => vec![
                Codec::new(CodecKind::Sbc, "sbc"),
                Codec::new(CodecKind::SbcXq, "sbc_xq"),
            ],
            "codec.aac" => vec![Codec::new(CodecKind::Aac, "aac")],
            "codec.aptx" => vec![
                Codec::new(CodecKind::Aptx, "aptx"),
                Codec::new(CodecKind::AptxHd, "aptx_hd"),
            ],
            "codec.faststream" => vec![Codec::new(CodecKind::Faststream, "faststream")],
            _ => return None,
        };
        Some(Box::new(BuiltinPlugin {
            factory: factory.to_string(),
            codecs: codecs.into_iter().map(Arc::new).collect(),
        }))
    }

    fn unload(&self, handle: Box<dyn PluginHandle>) {
        debug!(factory = handle.factory_name(), "unload plugin");
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config =
        MediaConfig::load_from(config_path.as_deref()).context("loading configuration")?;
    init_tracing(&config.telemetry.log_level);

    info!("mediagraph {} starting", env!("CARGO_PKG_VERSION"));

    let codecs = CodecSet::load(Arc::new(BuiltinPlugins), &config.codecs.factories)
        .context("loading codecs")?;
    for codec in codecs.codecs() {
        info!(codec = %codec.name, endpoint = codec.endpoint(), "codec available");
    }

    let engine_config = EngineConfig::from(&config);
    let period = Duration::from_secs_f64(
        f64::from(engine_config.quantum_size) / f64::from(engine_config.rate.max(1)),
    );
    let mut engine = Engine::new(engine_config);

    let mut sink_props = Properties::new();
    sink_props.set(NODE_DRIVER, "true");
    let sink = engine.create_node("demo-sink", sink_props)?;
    let tone = engine.create_node("demo-tone", Properties::new())?;

    let sink_frames = Arc::new(FrameCounter::default());
    let tone_frames = Arc::new(FrameCounter::default());
    engine.set_implementation(
        sink,
        Box::new(DemoNode {
            inputs: 2,
            outputs: 0,
            class: "Audio/Sink",
            processor: sink_frames.clone(),
        }),
    )?;
    engine.set_implementation(
        tone,
        Box::new(DemoNode {
            inputs: 0,
            outputs: 2,
            class: "Audio/Source",
            processor: tone_frames.clone(),
        }),
    )?;

    engine.register(sink, None, Properties::new())?;
    engine.register(tone, None, Properties::new())?;
    engine.set_driver(tone, Some(sink))?;
    engine.link_nodes(tone, sink)?;

    for id in [sink, tone] {
        engine.set_active(id, true)?;
        engine.set_state(id, NodeState::Running)?;
    }
    engine.dispatch_work();

    engine.start_data_loop()?;
    let handle = engine
        .loop_handle()
        .context("data loop did not start")?;

    let timer = thread::Builder::new()
        .name("demo-timer".to_string())
        .spawn(move || {
            for _ in 0..DEMO_CYCLES {
                if let Err(e) = handle.invoke_async(move |rt| rt.process(sink)) {
                    tracing::warn!("cycle dropped: {}", e);
                }
                thread::sleep(period);
            }
        })
        .context("spawning timer thread")?;
    timer
        .join()
        .map_err(|_| anyhow::anyhow!("timer thread panicked"))?;

    engine.stop_data_loop()?;
    if let Some(q) = engine.quantum(sink)? {
        info!(position = q.position, size = q.size, "last quantum");
    }
    info!(
        sink = sink_frames.frames.load(Ordering::Relaxed),
        tone = tone_frames.frames.load(Ordering::Relaxed),
        "frames processed"
    );

    engine.destroy(tone)?;
    engine.destroy(sink)?;
    codecs.release();

    info!("mediagraph shutdown complete");
    Ok(())
}
