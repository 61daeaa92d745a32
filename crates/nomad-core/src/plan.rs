//! Forward/backward/target-version planning.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::Result;
use crate::hazard::{detect as detect_hazards, validate_hazards};
use crate::model::{Direction, MigrationFile, PlannedMigration};

/// Tag filter applied to `plan_up`/`plan_down`.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub tags: Vec<String>,
}

impl TagFilter {
    fn matches(&self, file_tags: &Option<BTreeSet<String>>) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        match file_tags {
            Some(tags) => self.tags.iter().any(|t| tags.contains(t)),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub limit: Option<usize>,
    pub count: Option<usize>,
    pub target_version: Option<u64>,
    pub dry_run: bool,
    pub filter: Option<TagFilter>,
    pub include_ancestors: bool,
    pub auto_notx: bool,
}

/// Aggregate counts over a plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanSummary {
    pub total: usize,
    pub transactional: usize,
    pub non_transactional: usize,
    pub hazard_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub migrations: Vec<PlannedMigration>,
    pub summary: PlanSummary,
    pub warnings: Vec<String>,
}

/// Decorate one file with its hazard/transaction policy for `direction`.
///
/// The hazard policy is strict by default: a hazardous statement without
/// `notx` fails planning outright (`Err`) unless `options.auto_notx` is set,
/// in which case the migration runs outside a transaction with a warning.
fn decorate(file: &MigrationFile, direction: Direction, options: &PlanOptions) -> Result<PlannedMigration> {
    let section = match direction {
        Direction::Up => &file.parsed.up,
        Direction::Down => &file.parsed.down,
    };
    let joined = section.statements.join("\n");
    let hazards = detect_hazards(&joined);
    let has_notx = section.notx || file.parsed.no_transaction;

    let decision = validate_hazards(&hazards, has_notx, options.auto_notx, true)?;

    let (transaction, reason) = if has_notx {
        (false, Some("notx directive"))
    } else if decision.skip_transaction {
        (false, Some("auto-notx (hazards detected)"))
    } else {
        (true, None)
    };

    Ok(PlannedMigration {
        version: file.version,
        name: file.name.clone(),
        direction,
        transaction,
        reason,
        statements: section.statements.clone(),
        statement_lines: section.statement_lines.clone(),
        hazards,
        warnings: decision.warning.into_iter().collect(),
    })
}

fn summarize(migrations: &[PlannedMigration]) -> PlanSummary {
    let mut summary = PlanSummary {
        total: migrations.len(),
        ..Default::default()
    };
    for m in migrations {
        if m.transaction {
            summary.transactional += 1;
        } else {
            summary.non_transactional += 1;
        }
        summary.hazard_count += m.hazards.len();
    }
    summary
}

/// Build a forward plan over `pending`, ascending by version, truncated to
/// `options.limit` and filtered by `options.filter`.
pub fn plan_up<'a>(pending: &[&'a MigrationFile], options: &PlanOptions) -> Result<Plan> {
    let mut sorted: Vec<&MigrationFile> = pending.to_vec();
    sorted.sort_by_key(|f| f.version);

    let mut warnings = Vec::new();
    let selected: Vec<&MigrationFile> = match &options.filter {
        None => sorted,
        Some(filter) => {
            let matched_indices: Vec<usize> = sorted
                .iter()
                .enumerate()
                .filter(|(_, f)| filter.matches(&f.parsed.tags))
                .map(|(i, _)| i)
                .collect();

            if options.include_ancestors {
                let mut include = BTreeSet::new();
                for &idx in &matched_indices {
                    for i in 0..=idx {
                        include.insert(i);
                    }
                }
                sorted
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| include.contains(i))
                    .map(|(_, f)| *f)
                    .collect()
            } else {
                if matched_indices.first().copied().unwrap_or(0) > 0 {
                    warnings.push(
                        "tag filter skipped earlier pending migrations; pass --include-ancestors to apply them"
                            .to_string(),
                    );
                }
                matched_indices.into_iter().map(|i| sorted[i]).collect()
            }
        }
    };

    let truncated: Vec<&MigrationFile> = match options.limit {
        Some(limit) => selected.into_iter().take(limit).collect(),
        None => selected,
    };

    let migrations: Vec<PlannedMigration> = truncated
        .into_iter()
        .map(|f| decorate(f, Direction::Up, options))
        .collect::<Result<_>>()?;
    let summary = summarize(&migrations);

    Ok(Plan {
        migrations,
        summary,
        warnings,
    })
}

/// Build a backward plan over `applied`, descending by version, truncated
/// to `options.count` (default 1). A tag filter consumes from the head
/// only; it stops at the first non-matching head rather than skipping over
/// untagged migrations.
pub fn plan_down<'a>(applied: &[&'a MigrationFile], options: &PlanOptions) -> Result<Plan> {
    let mut sorted: Vec<&MigrationFile> = applied.to_vec();
    sorted.sort_by_key(|f| std::cmp::Reverse(f.version));

    let count = options.count.unwrap_or(1);

    let mut selected = Vec::new();
    for file in sorted {
        if selected.len() >= count {
            break;
        }
        if let Some(filter) = &options.filter {
            if !filter.matches(&file.parsed.tags) {
                break;
            }
        }
        selected.push(file);
    }

    let migrations: Vec<PlannedMigration> = selected
        .into_iter()
        .map(|f| decorate(f, Direction::Down, options))
        .collect::<Result<_>>()?;
    let summary = summarize(&migrations);

    Ok(Plan {
        migrations,
        summary,
        warnings: Vec::new(),
    })
}

/// Build a mixed-direction plan to `target`: forward if `target` is above
/// the highest applied version, backward if below, empty if equal.
pub fn plan_to<'a>(
    all: &[&'a MigrationFile],
    applied_versions: &BTreeSet<u64>,
    target: u64,
    options: &PlanOptions,
) -> Result<Plan> {
    let max_applied = applied_versions.iter().max().copied();

    match max_applied {
        Some(max) if target > max => {
            let pending: Vec<&MigrationFile> = all
                .iter()
                .filter(|f| !applied_versions.contains(&f.version) && f.version <= target)
                .copied()
                .collect();
            plan_up(&pending, options)
        }
        Some(max) if target < max => {
            let applied: Vec<&MigrationFile> = all
                .iter()
                .filter(|f| applied_versions.contains(&f.version) && f.version > target)
                .copied()
                .collect();
            plan_down(
                &applied,
                &PlanOptions {
                    count: Some(applied.len().max(1)),
                    ..options.clone()
                },
            )
        }
        None => {
            let pending: Vec<&MigrationFile> = all
                .iter()
                .filter(|f| f.version <= target)
                .copied()
                .collect();
            plan_up(&pending, options)
        }
        _ => Ok(Plan::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ParsedMigration, Section};

    fn file(version: u64, tags: Option<&[&str]>) -> MigrationFile {
        MigrationFile {
            version,
            name: format!("m{version}"),
            filepath: format!("{version}_m.sql"),
            content: String::new(),
            checksum: "x".repeat(64),
            parsed: ParsedMigration {
                up: Section {
                    statements: vec!["SELECT 1".to_string()],
                    statement_lines: vec![1],
                    notx: false,
                },
                down: Section {
                    statements: vec!["SELECT 2".to_string()],
                    statement_lines: vec![1],
                    notx: false,
                },
                tags: tags.map(|t| t.iter().map(|s| s.to_string()).collect()),
                no_transaction: false,
            },
        }
    }

    #[test]
    fn plan_up_is_prefix_of_ascending_order_truncated_by_limit() {
        let files = vec![file(3, None), file(1, None), file(2, None)];
        let refs: Vec<&MigrationFile> = files.iter().collect();
        let plan = plan_up(
            &refs,
            &PlanOptions {
                limit: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        let versions: Vec<u64> = plan.migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn plan_up_limit_zero_yields_empty_plan() {
        let files = vec![file(1, None)];
        let refs: Vec<&MigrationFile> = files.iter().collect();
        let plan = plan_up(
            &refs,
            &PlanOptions {
                limit: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(plan.migrations.is_empty());
    }

    #[test]
    fn plan_down_defaults_to_count_one_descending() {
        let files = vec![file(1, None), file(2, None), file(3, None)];
        let refs: Vec<&MigrationFile> = files.iter().collect();
        let plan = plan_down(&refs, &PlanOptions::default()).unwrap();
        assert_eq!(plan.migrations.len(), 1);
        assert_eq!(plan.migrations[0].version, 3);
    }

    #[test]
    fn plan_down_tag_filter_stops_at_first_non_matching_head() {
        let files = vec![
            file(1, Some(&["beta"])),
            file(2, Some(&["alpha"])),
            file(3, None),
        ];
        let refs: Vec<&MigrationFile> = files.iter().collect();
        let plan = plan_down(
            &refs,
            &PlanOptions {
                count: Some(10),
                filter: Some(TagFilter {
                    tags: vec!["alpha".to_string()],
                }),
                ..Default::default()
            },
        )
        .unwrap();
        // version 3 has no tags -> filter stops immediately; nothing selected.
        assert!(plan.migrations.is_empty());
    }

    #[test]
    fn plan_to_above_max_applied_is_forward() {
        let files = vec![file(1, None), file(2, None), file(3, None)];
        let refs: Vec<&MigrationFile> = files.iter().collect();
        let applied: BTreeSet<u64> = [1].into_iter().collect();
        let plan = plan_to(&refs, &applied, 3, &PlanOptions::default()).unwrap();
        let versions: Vec<u64> = plan.migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 3]);
        assert!(plan.migrations.iter().all(|m| m.direction == Direction::Up));
    }

    #[test]
    fn plan_to_below_max_applied_is_backward() {
        let files = vec![file(1, None), file(2, None), file(3, None)];
        let refs: Vec<&MigrationFile> = files.iter().collect();
        let applied: BTreeSet<u64> = [1, 2, 3].into_iter().collect();
        let plan = plan_to(&refs, &applied, 1, &PlanOptions::default()).unwrap();
        let versions: Vec<u64> = plan.migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![3, 2]);
        assert!(plan
            .migrations
            .iter()
            .all(|m| m.direction == Direction::Down));
    }

    #[test]
    fn plan_to_equal_target_is_empty() {
        let files = vec![file(1, None)];
        let refs: Vec<&MigrationFile> = files.iter().collect();
        let applied: BTreeSet<u64> = [1].into_iter().collect();
        let plan = plan_to(&refs, &applied, 1, &PlanOptions::default()).unwrap();
        assert!(plan.migrations.is_empty());
    }

    #[test]
    fn transaction_false_when_notx_directive_present() {
        let mut f = file(1, None);
        f.parsed.up.notx = true;
        let refs = vec![&f];
        let plan = plan_up(&refs, &PlanOptions::default()).unwrap();
        assert!(!plan.migrations[0].transaction);
        assert_eq!(plan.migrations[0].reason, Some("notx directive"));
    }

    #[test]
    fn hazards_without_notx_fail_planning_under_strict_policy() {
        let mut f = file(1, None);
        f.parsed.up.statements = vec!["VACUUM".to_string()];
        let refs = vec![&f];
        let err = plan_up(&refs, &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, crate::error::NomadError::ParseConfig(_)));
    }

    #[test]
    fn hazards_with_auto_notx_skip_transaction_and_warn() {
        let mut f = file(1, None);
        f.parsed.up.statements = vec!["VACUUM".to_string()];
        let refs = vec![&f];
        let plan = plan_up(
            &refs,
            &PlanOptions {
                auto_notx: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!plan.migrations[0].transaction);
        assert_eq!(
            plan.migrations[0].reason,
            Some("auto-notx (hazards detected)")
        );
        assert_eq!(plan.summary.hazard_count, 1);
        assert!(!plan.migrations[0].warnings.is_empty());
    }
}
