use sim::models::model_trait::DevsModel;
use sim::simulator::{Message, Simulation};
use std::fs::File;
use std::io::{BufWriter, Write};

use crate::error::Result;

fn trace_messages(messages: &[Message], trace_writer: &mut Option<BufWriter<File>>) -> Result<()> {
  for msg in messages.iter() {
    log::debug!(
      "[MSG] t={:.1} {}:{} -> {}:{} | {}",
      msg.time(),
      msg.source_id(),
      msg.source_port(),
      msg.target_id(),
      msg.target_port(),
      msg.content()
    );
  }

  if let Some(writer) = trace_writer {
    for msg in messages.iter() {
      let trace_entry = serde_json::json!({
        "time": msg.time(),
        "source": msg.source_id(),
        "source_port": msg.source_port(),
        "target": msg.target_id(),
        "target_port": msg.target_port(),
        "content": msg.content()
      });
      writeln!(writer, "{}", trace_entry)?;
    }
    writer.flush()?;
  }
  Ok(())
}

/// Advance the simulation by one clock edge.
///
/// Pending messages are delivered first (zero-time steps), then one step moves global time
/// forward and fires every model due at that edge. Returns the messages emitted on the way.
pub fn clock_step(simulation: &mut Simulation, trace_writer: &mut Option<BufWriter<File>>) -> Result<Vec<Message>> {
  let mut emitted = Vec::new();

  loop {
    let pending = simulation.get_messages().clone();
    trace_messages(&pending, trace_writer)?;

    if pending.is_empty() {
      let until_next_event = simulation
        .models()
        .iter()
        .fold(f64::INFINITY, |min, model| f64::min(min, model.until_next_event()));
      if until_next_event == f64::INFINITY {
        // every model idle, nothing left to clock
        break;
      }
    }

    let time0 = simulation.get_global_time();
    let messages = simulation.step()?;
    emitted.extend(messages);
    if simulation.get_global_time() > time0 {
      break;
    }
  }

  Ok(emitted)
}
