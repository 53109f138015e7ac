use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use tidewire_proto::{ComponentId, ReferenceFrame, RenderBatch, RenderTreeEdit};
use tidewire_server::transport::{ClientDriver, loopback};
use tidewire_server::{
    CircuitFault, CircuitHandler, CircuitId, CircuitRegistry, FaultDisposition, RenderConfig,
    metrics, telemetry,
};
use tokio::sync::mpsc;

const ROOT_COMPONENT: ComponentId = 1;

#[derive(Parser, Debug)]
#[command(name = "tidewire-loopback", about = "Render a counter list over an in-process channel")]
struct Cli {
    /// Number of render batches to send after the initial one.
    #[arg(long, default_value_t = 5)]
    batches: u32,

    /// Step whose batch carries an edit the client cannot apply.
    #[arg(long)]
    fail_at: Option<u32>,

    /// Delay before the client acknowledges each batch.
    #[arg(long, default_value_t = 0)]
    ack_delay_ms: u64,

    /// Overrides TIDEWIRE_RENDER_TIMEOUT_MS.
    #[arg(long)]
    render_timeout_ms: Option<u64>,

    /// Print Prometheus metrics before exiting.
    #[arg(long)]
    metrics: bool,
}

/// Keeps the demo circuit alive through failed renders.
struct KeepAlive;

#[async_trait]
impl CircuitHandler for KeepAlive {
    async fn on_circuit_opened(&self, circuit_id: CircuitId) -> anyhow::Result<()> {
        tracing::info!(%circuit_id, "circuit opened");
        Ok(())
    }

    fn on_unhandled_fault(&self, circuit_id: CircuitId, fault: &CircuitFault) -> FaultDisposition {
        tracing::warn!(%circuit_id, error = %fault, "continuing after fault");
        FaultDisposition::Continue
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init()?;

    let mut config = RenderConfig::from_env();
    if let Some(ms) = cli.render_timeout_ms {
        config = config.with_render_timeout(Duration::from_millis(ms.max(1)));
    }

    let registry = CircuitRegistry::new();
    let (proxy, peer) = loopback();
    let circuit = registry.create_circuit(Arc::new(proxy), config, vec![Arc::new(KeepAlive)]);
    let circuit_id = circuit.id();
    let registry_id = circuit.renderer().registry_id();

    let acks = registry.clone();
    let driver = ClientDriver::spawn(peer, Duration::from_millis(cli.ack_delay_ms), move |frame: Bytes| {
        if let Err(err) = acks.handle_client_frame(circuit_id, &frame) {
            tracing::warn!(error = %err, "dropping malformed acknowledgment");
        }
    });

    circuit.initialize().await.context("initialize circuit")?;
    circuit
        .attach_root_component(ROOT_COMPONENT)
        .context("attach root component")?;

    let (tx, mut completions) = mpsc::unbounded_channel();
    let mut items = 0u32;
    for step in 0..=cli.batches {
        let batch = if cli.fail_at == Some(step) {
            faulty_batch()
        } else if step == 0 {
            list_batch()
        } else {
            items += 1;
            item_batch(items)
        };
        let tx = tx.clone();
        circuit.enqueue_mutation(move |ctx| async move {
            let completion = ctx.dispatch_batch(&batch);
            let _ = tx.send((step, completion));
            Ok(())
        })?;
    }
    drop(tx);

    let mut failed = 0;
    while let Some((step, completion)) = completions.recv().await {
        match completion.await {
            Ok(()) => tracing::info!(step, "batch applied"),
            Err(err) => {
                failed += 1;
                tracing::warn!(step, error = %err, "batch failed");
            }
        }
    }

    let snapshot = driver.with_client(|client| {
        client
            .tree(registry_id)
            .map(|tree| tree.snapshot_root().to_string())
    });
    println!("{}", snapshot.unwrap_or_default());
    println!(
        "renders: {} sent, {} failed",
        circuit.renderer().last_render_id(),
        failed
    );
    if cli.metrics {
        print!("{}", metrics::gather_text());
    }

    registry.terminate(circuit_id).await;
    Ok(())
}

fn list_batch() -> RenderBatch {
    let mut batch = RenderBatch::new();
    let list = batch.push_frame(ReferenceFrame::element("ul", 2));
    batch.push_frame(ReferenceFrame::attribute("class", "counter"));
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::prepend(0, list)]);
    batch
}

fn item_batch(count: u32) -> RenderBatch {
    let mut batch = RenderBatch::new();
    let item = batch.push_frame(ReferenceFrame::element("li", 2));
    batch.push_frame(ReferenceFrame::text(format!("item {count}")));
    batch.push_diff(
        ROOT_COMPONENT,
        vec![
            RenderTreeEdit::step_in(0),
            RenderTreeEdit::prepend(count - 1, item),
            RenderTreeEdit::StepOut,
        ],
    );
    batch
}

fn faulty_batch() -> RenderBatch {
    let mut batch = RenderBatch::new();
    batch.push_diff(ROOT_COMPONENT, vec![RenderTreeEdit::remove(u32::MAX)]);
    batch
}
