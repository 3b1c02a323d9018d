//! Signal simulation scheduler: spawns one daemon thread per producer,
//! independent of every other producer and of the fieldbus connections
//! reading the same memory image.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use plc_common::config::SimulationConfig;
use plc_common::{PlcError, PlcResult};
use plc_memory::{MemoryImage, Section};
use tracing::{debug, warn};

use crate::function::SignalFunction;

/// Owns the producer threads for one memory image.
///
/// Producers run until [`Scheduler::shutdown`] is called or the process
/// exits; there is no scan-cycle barrier between them, matching the
/// original design where each producer is an independent free-running loop.
pub struct Scheduler {
    memory: Arc<MemoryImage>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Build a scheduler over `memory`. No producers are running yet.
    #[must_use]
    pub fn new(memory: Arc<MemoryImage>) -> Self {
        Self {
            memory,
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Spawn a thread for one producer definition.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` names an unknown section or function
    /// family, or if the OS refuses to spawn the thread.
    pub fn spawn_producer(&mut self, config: SimulationConfig) -> PlcResult<()> {
        let target_section = Section::from_name(&config.memspace.section)?;
        let target_addr = config.memspace.addr;
        let target_len = config.memspace.nrefs();

        let source = match &config.source {
            Some(src) => Some((
                Section::from_name(&src.memspace.section)?,
                src.memspace.addr,
                src.memspace.nrefs(),
            )),
            None => None,
        };

        let wlen = self.memory.word_len(target_section);
        let mut function = SignalFunction::from_config(&config.function, wlen)?;
        if function.needs_source() && source.is_none() {
            return Err(PlcError::ConfigError(
                "copy/transform function requires a source memspace".to_string(),
            ));
        }

        let pause = config.pause.map(Duration::from_secs_f64);
        let id = config.id.clone().unwrap_or_else(|| {
            format!(
                "{}:{}:{}",
                config.memspace.section, target_addr, config.function.kind
            )
        });

        let memory = Arc::clone(&self.memory);
        let shutdown = Arc::clone(&self.shutdown);
        let thread_id = id.clone();

        let handle = thread::Builder::new()
            .name(format!("sim-{id}"))
            .spawn(move || {
                debug!(id = %thread_id, "signal producer started");
                while !shutdown.load(Ordering::Relaxed) {
                    let tick = Self::tick(
                        &memory,
                        &mut function,
                        target_section,
                        target_addr,
                        target_len,
                        source,
                    );
                    if let Err(e) = tick {
                        warn!(id = %thread_id, error = %e, "signal producer stopped on error");
                        break;
                    }
                    if let Some(p) = pause {
                        thread::sleep(p);
                    }
                }
                debug!(id = %thread_id, "signal producer stopped");
            })
            .map_err(|e| PlcError::IoFailure(e.to_string()))?;

        self.handles.push(handle);
        Ok(())
    }

    fn tick(
        memory: &MemoryImage,
        function: &mut SignalFunction,
        target_section: Section,
        target_addr: usize,
        target_len: usize,
        source: Option<(Section, usize, usize)>,
    ) -> PlcResult<()> {
        if function.needs_source() {
            let (src_section, src_addr, src_len) = source.expect("checked at spawn time");
            let src_values = memory.get_data(src_section, src_addr, src_len)?;
            let mut out = Vec::with_capacity(src_values.len());
            for v in src_values {
                match function.next(Some(v as i64))? {
                    Some(value) => out.push(value as u64),
                    // no transform rule matched this tick's source value: skip
                    // the write entirely, leaving the memory image untouched.
                    None => return Ok(()),
                }
            }
            memory.set_data(target_section, target_addr, &out)
        } else {
            match function.next(None)? {
                Some(value) => {
                    let values = vec![value as u64; target_len];
                    memory.set_data(target_section, target_addr, &values)
                }
                None => Ok(()),
            }
        }
    }

    /// Signal every producer thread to stop and wait for them to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plc_common::config::{FunctionConfig, MemspaceRef};
    use std::time::Duration as StdDuration;

    #[test]
    fn counter_producer_advances_memory() {
        let memory = Arc::new(MemoryImage::new(0, 1, 0, 0));
        let mut scheduler = Scheduler::new(Arc::clone(&memory));

        let config = SimulationConfig {
            id: Some("counter0".to_string()),
            memspace: MemspaceRef {
                section: "words16".to_string(),
                addr: 0,
                nwords: Some(1),
                nbits: None,
            },
            function: FunctionConfig {
                kind: "counter".to_string(),
                range: Some(vec![0, 5, 1]),
                ..Default::default()
            },
            source: None,
            pause: Some(0.001),
        };

        scheduler.spawn_producer(config).unwrap();
        thread::sleep(StdDuration::from_millis(50));
        scheduler.shutdown();

        let value = memory.get_words16(0, 1).unwrap()[0];
        assert!(value < 5);
    }

    #[test]
    fn copy_producer_mirrors_source() {
        let memory = Arc::new(MemoryImage::new(0, 2, 0, 0));
        memory.set_words16(0, &[77]).unwrap();
        let mut scheduler = Scheduler::new(Arc::clone(&memory));

        let config = SimulationConfig {
            id: Some("mirror0".to_string()),
            memspace: MemspaceRef {
                section: "words16".to_string(),
                addr: 1,
                nwords: Some(1),
                nbits: None,
            },
            function: FunctionConfig {
                kind: "copy".to_string(),
                ..Default::default()
            },
            source: Some(plc_common::config::SourceConfig {
                memspace: MemspaceRef {
                    section: "words16".to_string(),
                    addr: 0,
                    nwords: Some(1),
                    nbits: None,
                },
            }),
            pause: Some(0.001),
        };

        scheduler.spawn_producer(config).unwrap();
        thread::sleep(StdDuration::from_millis(50));
        scheduler.shutdown();

        assert_eq!(memory.get_words16(1, 1).unwrap()[0], 77);
    }
}
