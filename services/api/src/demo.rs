use crate::infra::{in_memory_dependencies, start_of_day};
use chrono::{Duration, Local, NaiveDate};
use clap::Args;
use compliance_engine::config::AppConfig;
use compliance_engine::engine::{ComplianceEngine, SweepReport};
use compliance_engine::error::AppError;
use compliance_engine::obligations::{
    BusinessEntity, EntityRoster, EntityType, EventType, ObligationTemplate, Priority,
    Recurrence, StaticRulesProvider,
};
use compliance_engine::telemetry;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub(crate) struct SweepArgs {
    /// CSV roster of business entities to sweep
    #[arg(long)]
    pub(crate) roster: PathBuf,
    /// Sweep date (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<NaiveDate>,
    /// Print the sweep report as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Formation date of the demo LLC (YYYY-MM-DD)
    #[arg(long, value_parser = crate::infra::parse_date, default_value = "2023-01-10")]
    pub(crate) formation_date: NaiveDate,
    /// Name printed for the demo entity
    #[arg(long, default_value = "Harbor Labs LLC")]
    pub(crate) entity_name: String,
}

pub(crate) fn run_sweep_command(args: SweepArgs) -> Result<(), AppError> {
    let SweepArgs {
        roster,
        today,
        json,
    } = args;

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let entities = EntityRoster::from_path(&roster)?;
    let engine = ComplianceEngine::new(
        config.engine,
        in_memory_dependencies(Arc::new(StaticRulesProvider::standard()), entities),
    );

    let today = today.unwrap_or_else(|| Local::now().date_naive());
    let report = engine.run_sweep(start_of_day(today))?;

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("failed to render sweep report: {err}"),
        }
    } else {
        println!("Compliance sweep for {today} ({})", roster.display());
        render_sweep_report(&report);
    }

    Ok(())
}

fn render_sweep_report(report: &SweepReport) {
    println!(
        "- entities: {} processed | {} skipped | {} failed",
        report.entities_processed, report.entities_skipped, report.entities_failed
    );
    println!(
        "- events: {} created | {} transitioned | {} escalated | {} renewed",
        report.events_created,
        report.events_transitioned,
        report.events_escalated,
        report.recurrences_created
    );
    println!(
        "- notifications: {} candidates | {} sent | {} failed | {} duplicates | {} deferred",
        report.candidates,
        report.notifications_sent,
        report.notifications_failed,
        report.duplicates_suppressed,
        report.deferred
    );
}

fn demo_entity(args: &DemoArgs) -> Result<Option<BusinessEntity>, AppError> {
    let csv = format!(
        "entity_id,name,entity_type,jurisdiction,formation_date,owners,active\n\
         ent-demo,\"{}\",llc,DE,{},founder,true\n",
        args.entity_name.replace('"', "\"\""),
        args.formation_date
    );
    Ok(EntityRoster::from_reader(Cursor::new(csv))?.into_iter().next())
}

fn annual_report_rules(entity: &BusinessEntity) -> StaticRulesProvider {
    StaticRulesProvider::empty().with_rules(
        entity.jurisdiction.clone(),
        vec![EntityType::Llc],
        vec![ObligationTemplate {
            event_type: EventType::AnnualReport,
            title: "Annual Report".to_string(),
            description: "File the annual report with the Secretary of State.".to_string(),
            recurrence: Some(Recurrence::annual()),
            anchor_offset_days: 0,
            priority: Priority::Medium,
        }],
    )
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let Some(entity) = demo_entity(&args)? else {
        return Ok(());
    };
    let Some(due_date) = Recurrence::annual().advance(entity.formation_date) else {
        println!("Formation date {} has no first anniversary", entity.formation_date);
        return Ok(());
    };
    let Some(owner) = entity.owners.first().cloned() else {
        return Ok(());
    };

    let rules = Arc::new(annual_report_rules(&entity));
    let entity_id = entity.id.clone();
    let engine = ComplianceEngine::new(
        AppConfig::load()?.engine,
        in_memory_dependencies(rules, vec![entity]),
    );

    println!("Compliance deadline demo for {}", args.entity_name);
    println!(
        "- formed {} | annual report due {}",
        args.formation_date, due_date
    );

    for offset in [-9, -5, 1, 2, 10] {
        let today = due_date + Duration::days(offset);
        let now = start_of_day(today);
        let report = engine.run_sweep(now)?;
        let dashboard = engine.dashboard(&entity_id, now)?;
        let status = dashboard
            .overdue
            .iter()
            .chain(&dashboard.due_soon)
            .chain(&dashboard.pending)
            .find(|event| event.due_date == due_date)
            .map(|event| format!("{} ({:?} priority)", event.status, event.priority))
            .unwrap_or_else(|| "not tracked".to_string());
        println!(
            "\n{today}: annual report {status}\n  sweep sent {} | suppressed {} duplicates | deferred {}",
            report.notifications_sent, report.duplicates_suppressed, report.deferred
        );
    }

    let completed_on = due_date + Duration::days(11);
    let overdue = engine.list_overdue(&entity_id, start_of_day(completed_on))?;
    if let Some(event) = overdue.first() {
        let transition =
            engine.mark_completed(&event.id, owner.0.as_str(), start_of_day(completed_on))?;
        println!(
            "\n{completed_on}: marked {} -> {}",
            transition.change.from, transition.change.to
        );
        if let Some(next) = transition.next_cycle {
            println!("  next cycle due {} ({})", next.due_date, next.status);
        }
    }

    println!("\nNotification history for {owner}");
    let mut history = engine.notification_history(&owner)?;
    history.reverse();
    for record in history {
        println!(
            "  - {} {} via {} | score {} | {:?}",
            record.sent_at.date_naive(),
            record.reason.label(),
            record.channel.label(),
            record.score,
            record.delivery_outcome
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_entity_is_a_delaware_llc_owned_by_founder() {
        let args = DemoArgs {
            formation_date: NaiveDate::from_ymd_opt(2023, 1, 10).expect("valid date"),
            entity_name: "Harbor \"Labs\", LLC".to_string(),
        };

        let entity = demo_entity(&args)
            .expect("roster parses")
            .expect("one entity");
        assert_eq!(entity.name, "Harbor \"Labs\", LLC");
        assert_eq!(entity.entity_type, EntityType::Llc);
        assert_eq!(entity.jurisdiction.code(), "DE");
        assert_eq!(entity.owners.len(), 1);
        assert_eq!(
            Recurrence::annual().advance(entity.formation_date),
            NaiveDate::from_ymd_opt(2024, 1, 10)
        );
    }
}
