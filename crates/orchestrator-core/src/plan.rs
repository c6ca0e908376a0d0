//! Plan format, admission-time validation, and dependency canonicalization.
//!
//! Three reference forms can appear inside a `JobSpec`'s `params`:
//!
//! - `$<planLocalId>` / `from-<planLocalId>` — a direct sentinel string
//!   substituted at dispatch time for the referenced job's primary output.
//! - `_imageJobDependency:<planLocalId>` — the sentinel a nested operation
//!   descriptor is rewritten to once it has been lifted to a sibling job.
//! - a nested operation descriptor itself, `{ "type": "...", "params": {} }`,
//!   which admission lifts into a new sibling `JobSpec` and replaces with the
//!   sentinel above.
//!
//! This module canonicalizes a submitted plan: every reference found in
//! params is mirrored into `depends_on`, nested descriptors are lowered to
//! flat sibling jobs, and the result is checked for cycles and unknown
//! dependency targets before a single row is written.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::PlanValidationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub operation: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub jobs: Vec<JobSpec>,
    #[serde(default, rename = "baseExecutionId")]
    pub base_execution_id: Option<String>,
}

/// A plan after canonicalization: dependencies merged from param references,
/// nested operations lowered to siblings, jobs in their final insertion
/// order (originals first, then lowered jobs in the order they were lifted),
/// and a topological ordering used to pick the "designated result job".
#[derive(Debug, Clone)]
pub struct CanonicalPlan {
    pub jobs: Vec<JobSpec>,
    /// Index into `jobs` of the execution's designated result job: the last
    /// job with no dependents in topological order, insertion-order
    /// tiebroken.
    pub result_job_index: usize,
}

const IMAGE_DEP_PREFIX: &str = "_imageJobDependency:";
const FROM_PREFIX: &str = "from-";

pub fn validate_and_canonicalize(
    plan: ExecutionPlan,
    known_operations: &dyn Fn(&str) -> bool,
) -> Result<CanonicalPlan, PlanValidationError> {
    if plan.jobs.is_empty() {
        return Err(PlanValidationError::EmptyPlan);
    }

    let mut jobs = plan.jobs;
    let mut seen_ids: HashSet<String> = HashSet::new();
    for job in &jobs {
        if !seen_ids.insert(job.id.clone()) {
            return Err(PlanValidationError::DuplicateJobId(job.id.clone()));
        }
    }

    // Lower nested operation descriptors to sibling jobs, accumulating new
    // jobs as we go. `lift_counter` keeps generated ids unique even if a
    // parent has multiple nested descriptors across recursive params.
    let mut lift_counter: u32 = 0;
    let mut lowered_jobs: Vec<JobSpec> = Vec::new();
    for job in jobs.iter_mut() {
        let parent_id = job.id.clone();
        job.params = lower_nested_operations(
            job.params.take(),
            &parent_id,
            &mut lift_counter,
            &mut lowered_jobs,
            &seen_ids,
        );
    }
    for lowered in &lowered_jobs {
        seen_ids.insert(lowered.id.clone());
    }
    jobs.extend(lowered_jobs);

    // Mirror every param reference into `depends_on`.
    for job in jobs.iter_mut() {
        let refs = collect_references(&job.params);
        let mut merged: HashSet<String> = job.depends_on.drain(..).collect();
        for r in refs {
            if !seen_ids.contains(&r) {
                return Err(PlanValidationError::UnresolvedParamReference(
                    job.id.clone(),
                    r,
                ));
            }
            merged.insert(r);
        }
        job.depends_on = merged.into_iter().collect();
        job.depends_on.sort();
    }

    for job in &jobs {
        if !known_operations(&job.operation) {
            return Err(PlanValidationError::UnsupportedOperation(
                job.id.clone(),
                job.operation.clone(),
            ));
        }
        for dep in &job.depends_on {
            if !seen_ids.contains(dep) {
                return Err(PlanValidationError::UnknownDependency(
                    job.id.clone(),
                    dep.clone(),
                ));
            }
        }
    }

    let order = topological_order(&jobs)?;
    let result_job_index = designated_result_job(&jobs, &order);

    Ok(CanonicalPlan {
        jobs,
        result_job_index,
    })
}

/// Recursively walk a params value, lifting any nested `{ "type": ..,
/// "params": .. }` operation descriptor into a new sibling `JobSpec` and
/// replacing it in place with the `_imageJobDependency:<id>` sentinel.
fn lower_nested_operations(
    value: serde_json::Value,
    parent_id: &str,
    lift_counter: &mut u32,
    lowered_jobs: &mut Vec<JobSpec>,
    existing_ids: &HashSet<String>,
) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) => {
            if let (Some(serde_json::Value::String(op)), Some(nested_params)) =
                (map.get("type").cloned(), map.get("params").cloned())
            {
                let nested_params =
                    lower_nested_operations(nested_params, parent_id, lift_counter, lowered_jobs, existing_ids);
                let new_id = loop {
                    *lift_counter += 1;
                    let candidate = format!("{parent_id}_lifted_{lift_counter}");
                    if !existing_ids.contains(&candidate) {
                        break candidate;
                    }
                };
                lowered_jobs.push(JobSpec {
                    id: new_id.clone(),
                    operation: op,
                    params: nested_params,
                    depends_on: Vec::new(),
                });
                return serde_json::Value::String(format!("{IMAGE_DEP_PREFIX}{new_id}"));
            }
            for (_, v) in map.iter_mut() {
                *v = lower_nested_operations(v.take(), parent_id, lift_counter, lowered_jobs, existing_ids);
            }
            serde_json::Value::Object(map)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(|v| lower_nested_operations(v, parent_id, lift_counter, lowered_jobs, existing_ids))
                .collect(),
        ),
        other => other,
    }
}

/// Walk a params value collecting every plan-local id referenced by a
/// `$id`, `from-id`, or `_imageJobDependency:id` sentinel string.
fn collect_references(value: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_references_into(value, &mut out);
    out
}

fn collect_references_into(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            if let Some(id) = parse_reference(s) {
                out.push(id);
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                collect_references_into(v, out);
            }
        }
        serde_json::Value::Array(items) => {
            for v in items {
                collect_references_into(v, out);
            }
        }
        _ => {}
    }
}

/// Parse a string value as one of the three reference forms, returning the
/// referenced plan-local job id if it matches.
pub fn parse_reference(s: &str) -> Option<String> {
    if let Some(id) = s.strip_prefix(IMAGE_DEP_PREFIX) {
        return Some(id.to_string());
    }
    if let Some(id) = s.strip_prefix(FROM_PREFIX) {
        return Some(id.to_string());
    }
    if let Some(id) = s.strip_prefix('$') {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }
    None
}

fn topological_order(jobs: &[JobSpec]) -> Result<Vec<usize>, PlanValidationError> {
    let index_of: HashMap<&str, usize> = jobs
        .iter()
        .enumerate()
        .map(|(i, j)| (j.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; jobs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); jobs.len()];
    for (i, job) in jobs.iter().enumerate() {
        in_degree[i] = job.depends_on.len();
        for dep in &job.depends_on {
            let dep_idx = index_of[dep.as_str()];
            dependents[dep_idx].push(i);
        }
    }

    // Insertion-order-stable Kahn's algorithm: always pick the
    // lowest-insertion-order ready job, so ties break deterministically.
    let mut ready: VecDeque<usize> = (0..jobs.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(jobs.len());
    while let Some(i) = pop_min(&mut ready) {
        order.push(i);
        for &dep_idx in &dependents[i] {
            in_degree[dep_idx] -= 1;
            if in_degree[dep_idx] == 0 {
                ready.push_back(dep_idx);
            }
        }
    }

    if order.len() != jobs.len() {
        let stuck = (0..jobs.len()).find(|&i| in_degree[i] > 0).unwrap();
        return Err(PlanValidationError::Cycle(jobs[stuck].id.clone()));
    }

    Ok(order)
}

fn pop_min(ready: &mut VecDeque<usize>) -> Option<usize> {
    if ready.is_empty() {
        return None;
    }
    let (pos, _) = ready.iter().enumerate().min_by_key(|(_, &v)| v)?;
    ready.remove(pos)
}

/// The last topologically-ordered job with no dependents, insertion-order
/// tiebroken.
fn designated_result_job(jobs: &[JobSpec], order: &[usize]) -> usize {
    let mut has_dependent = vec![false; jobs.len()];
    let index_of: HashMap<&str, usize> = jobs
        .iter()
        .enumerate()
        .map(|(i, j)| (j.id.as_str(), i))
        .collect();
    for job in jobs {
        for dep in &job.depends_on {
            has_dependent[index_of[dep.as_str()]] = true;
        }
    }

    order
        .iter()
        .rev()
        .find(|&&i| !has_dependent[i])
        .copied()
        .unwrap_or_else(|| *order.last().unwrap())
}
