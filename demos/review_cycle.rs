//! Document review cycle example.
//!
//! This example demonstrates:
//! - Building a hierarchical workflow with sub-states and transitions
//! - Gating completion on a predicate
//! - Rolling a rejected review back to an earlier state
//! - Suspendable hooks driven by the async engine
//! - Observing workflow events and status reports
//!
//! Run with: `cargo run --example review_cycle`
//! Set `RUST_LOG=heddle=debug` to see the engine's own tracing.

use std::time::Duration;

use heddle::{Kind, LifecyclePoint, Result, State, Status, Workflow, WorkflowEvent};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("╔═══════════════════════════════════════════╗");
    println!("║  Heddle Review Cycle Example              ║");
    println!("╚═══════════════════════════════════════════╝\n");

    println!("📋 Building workflow...");
    let mut workflow = Workflow::new();
    let document = workflow.add_state(State::new(100, "Document").with_kind(Kind::Root));
    let draft = workflow.add_state(State::new(101, "Draft").with_initialise_with_parent(true));
    let review = workflow.add_state(State::new(102, "Review").with_can_complete(|state| {
        if state.context_value("approver").is_some() {
            return true;
        }
        state.log("Review needs an approver");
        false
    }));
    let publish = workflow.add_state(State::new(103, "Publish").with_kind(Kind::Auto));

    workflow
        .node(document)
        .add_sub_state(draft)
        .add_sub_state(review)
        .add_sub_state(publish);
    workflow.node(draft).add_transition(review);
    workflow
        .node(review)
        .add_transition(publish)
        .add_transition(draft);
    workflow
        .node(publish)
        .add_async_action(LifecyclePoint::Entry, |state| {
            Box::pin(async move {
                // Simulate pushing the document to a remote site
                tokio::time::sleep(Duration::from_millis(100)).await;
                state.log("Document pushed to the site");
                Ok(())
            })
        });

    println!("   States: {}\n", workflow.len());

    let mut events = workflow.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkflowEvent::TransitionSelected { from, to } => {
                    println!("   [Event] {} handed over to {}", from, to);
                }
                WorkflowEvent::RolledBack { from, to } => {
                    println!("   [Event] {} rolled back to {}", from, to);
                }
                WorkflowEvent::Faulted { error, .. } => {
                    println!("   [Event] Fault: {}", error);
                }
                _ => {}
            }
        }
    });

    println!("▶️  Starting the document");
    println!("─────────────────────────────────────────");
    workflow.execute_async(document, Status::Initialised).await?;
    workflow.execute_async(draft, Status::Completed).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("\n{}", workflow.report(document)?);

    println!("👤 Reviewer tries to sign off without approval...");
    if let Err(error) = workflow.execute_to_async(review, publish).await {
        println!("   {}\n", error);
    }

    println!("↩️  Reviewer rejects the draft");
    println!("─────────────────────────────────────────");
    workflow
        .execute_with_async(review, Status::Failed, Some(draft))
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("\n{}", workflow.report(document)?);

    println!("✏️  Second draft, approved this time");
    println!("─────────────────────────────────────────");
    workflow.execute_async(draft, Status::Completed).await?;
    if let Some(state) = workflow.state_mut(review) {
        state.insert_context("approver", serde_json::json!("alice"));
    }
    workflow.execute_to_async(review, publish).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\n📊 Final Status:");
    println!("─────────────────────────────────────────");
    let report = workflow.report(document)?;
    println!("{}", report);

    if report.is_complete() {
        println!("🎉 Document published!\n");
    }

    Ok(())
}
