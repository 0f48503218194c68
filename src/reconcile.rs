//! Reconciliation orchestrator.
//!
//! Every distinct request starts PENDING and ends RESOLVED or UNRESOLVED:
//! 1. batch: one `VALUES` query per chunk in the default language
//! 2. single: one query per pending name in the default language
//! 3. fallback: per pending name, each fallback language in priority order
//!
//! Rounds only look at PENDING names, so a name is never queried again once it
//! resolves. Transient query failures read as "no data" for that round; fatal
//! and usage errors abort the batch.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::aggregate::{aggregate, dominant};
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::sparql::client::{EndpointClient, RetryPolicy};
use crate::sparql::limiter::RateLimiter;
use crate::sparql::query::{is_entity_id, validate_language, QueryBuilder};
use crate::sparql::{Binding, SPARQL_JSON};
use crate::types::{name_key, EntityRecord, NameState, ResolutionResult, ResolvedName, Strategy};

/// Per-call overrides for [`Resolver::resolve_batch`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Replaces the configured fallback languages for this batch.
    pub language_fallbacks: Option<Vec<String>>,
    /// Retries per query after the first attempt.
    pub max_retries: Option<u32>,
    /// Overall budget, measured from the call.
    pub deadline: Option<Duration>,
}

/// Queries tried in order for one request; the first that yields an entity wins.
type Attempts = Vec<(Strategy, String)>;

/// Request identities and their states for one batch.
#[derive(Debug)]
pub(crate) struct Ledger {
    requests: Vec<String>,
    index: HashMap<String, usize>,
    states: Vec<NameState>,
}

impl Ledger {
    /// Collapse case-insensitive duplicates onto their first occurrence.
    pub(crate) fn new<S: AsRef<str>>(names: &[S]) -> Result<Self, ResolveError> {
        let mut requests = Vec::new();
        let mut index = HashMap::new();
        for name in names {
            let name = name.as_ref();
            if name.trim().is_empty() {
                return Err(ResolveError::InvalidInput("empty entity name".to_string()));
            }
            if let Entry::Vacant(slot) = index.entry(name_key(name)) {
                slot.insert(requests.len());
                requests.push(name.to_string());
            }
        }
        let states = vec![NameState::Pending; requests.len()];
        Ok(Self {
            requests,
            index,
            states,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn requested(&self, position: usize) -> &str {
        &self.requests[position]
    }

    #[cfg(test)]
    pub(crate) fn state(&self, position: usize) -> &NameState {
        &self.states[position]
    }

    fn position(&self, label: &str) -> Option<usize> {
        self.index.get(&name_key(label)).copied()
    }

    fn pending(&self) -> Vec<usize> {
        (0..self.states.len())
            .filter(|&p| self.states[p].is_pending())
            .collect()
    }

    fn resolve(&mut self, position: usize, record: EntityRecord, strategy: Strategy) {
        let state = &mut self.states[position];
        if !state.is_pending() {
            return;
        }
        log::debug!(
            "reconcile: {:?} -> {} ({:?})",
            self.requests[position],
            record.name,
            strategy
        );
        *state = NameState::Resolved { record, strategy };
    }

    /// Move every PENDING name to UNRESOLVED. Returns how many moved.
    fn give_up_pending(&mut self) -> usize {
        let mut moved = 0;
        for state in &mut self.states {
            if state.is_pending() {
                *state = NameState::Unresolved;
                moved += 1;
            }
        }
        moved
    }

    fn into_result(self) -> ResolutionResult {
        let mut result = ResolutionResult::default();
        for (requested, state) in self.requests.into_iter().zip(self.states) {
            match state {
                NameState::Resolved { record, .. } => {
                    result.resolved.push(ResolvedName { requested, record })
                }
                NameState::Pending | NameState::Unresolved => result.unresolved.push(requested),
            }
        }
        result
    }
}

/// Run one query. Transient failures (after the client's own retries) are
/// logged and read as "no data".
async fn fetch(
    client: &EndpointClient,
    query: &str,
    policy: &RetryPolicy,
) -> Result<Option<Vec<Binding>>, ResolveError> {
    match client.execute_with(query, SPARQL_JSON, policy).await {
        Ok(bindings) => Ok(Some(bindings)),
        Err(err) if err.is_retryable() => {
            log::warn!("reconcile: treating query as empty after {}", err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

async fn first_hit(
    client: &EndpointClient,
    attempts: &[(Strategy, String)],
    policy: &RetryPolicy,
) -> Result<Option<(EntityRecord, Strategy)>, ResolveError> {
    for (strategy, query) in attempts {
        let Some(bindings) = fetch(client, query, policy).await? else {
            continue;
        };
        if let Some(best) = dominant(aggregate(&bindings)) {
            return Ok(Some((best.record, *strategy)));
        }
    }
    Ok(None)
}

/// `Ok(false)` when the deadline passed before `work` finished.
async fn within<F>(deadline: Option<Instant>, work: F) -> Result<bool, ResolveError>
where
    F: Future<Output = Result<(), ResolveError>>,
{
    match deadline {
        None => work.await.map(|()| true),
        Some(at) => match tokio::time::timeout_at(at, work).await {
            Ok(outcome) => outcome.map(|()| true),
            Err(_) => Ok(false),
        },
    }
}

pub struct Resolver {
    client: Arc<EndpointClient>,
    queries: QueryBuilder,
    fallback_languages: Vec<String>,
    chunk_size: usize,
    concurrency: usize,
}

impl Resolver {
    pub fn new(client: Arc<EndpointClient>, config: &ResolverConfig) -> Result<Self, ResolveError> {
        config.validate()?;
        Ok(Self {
            client,
            queries: QueryBuilder::new(&config.default_language)?,
            fallback_languages: config.fallback_languages.clone(),
            chunk_size: config.batch_chunk_size,
            concurrency: config.concurrency,
        })
    }

    /// Resolver over HTTP with its own shared rate limiter.
    pub fn from_config(config: &ResolverConfig) -> Result<Self, ResolveError> {
        let limiter = Arc::new(RateLimiter::new(config.min_request_interval()));
        let client = EndpointClient::from_config(config, limiter)?;
        Self::new(Arc::new(client), config)
    }

    pub fn client(&self) -> &Arc<EndpointClient> {
        &self.client
    }

    /// Resolve a batch of names through all three rounds.
    ///
    /// Both result lists follow request order. On deadline expiry, names
    /// still PENDING are reported unresolved and no further query starts.
    pub async fn resolve_batch<S: AsRef<str>>(
        &self,
        names: &[S],
        options: BatchOptions,
    ) -> Result<ResolutionResult, ResolveError> {
        let mut ledger = Ledger::new(names)?;
        let languages = self.fallbacks(options.language_fallbacks.as_deref())?;
        let policy = self.policy(options.max_retries);
        let deadline = options.deadline.map(|budget| Instant::now() + budget);

        log::info!(
            "reconcile: {} names ({} distinct), fallbacks {:?}",
            names.len(),
            ledger.len(),
            languages
        );

        let finished = within(deadline, async {
            self.batch_round(&mut ledger, &policy).await?;
            self.single_round(&mut ledger, &policy).await?;
            self.fallback_round(&mut ledger, &languages, &policy).await
        })
        .await?;

        if !finished {
            let expired = ledger.give_up_pending();
            log::warn!(
                "reconcile: deadline reached, {} names left unresolved",
                expired
            );
        }

        let result = ledger.into_result();
        log::info!(
            "reconcile: {} resolved, {} unresolved",
            result.resolved.len(),
            result.unresolved.len()
        );
        Ok(result)
    }

    /// Resolve one name with the per-entity and language fallback rounds.
    pub async fn resolve_one(&self, name: &str) -> Result<Option<EntityRecord>, ResolveError> {
        let mut ledger = Ledger::new(&[name])?;
        let languages = self.fallbacks(None)?;
        let policy = self.client.policy().clone();

        self.single_round(&mut ledger, &policy).await?;
        self.fallback_round(&mut ledger, &languages, &policy).await?;
        Ok(ledger.into_result().resolved.pop().map(|r| r.record))
    }

    /// Fetch records by identifier: chunked `VALUES` queries, then one query
    /// per identifier the batch missed.
    pub async fn resolve_ids<S: AsRef<str>>(
        &self,
        ids: &[S],
    ) -> Result<ResolutionResult, ResolveError> {
        let ids: Vec<&str> = ids.iter().map(|id| id.as_ref().trim()).collect();
        if let Some(bad) = ids.iter().find(|id| !is_entity_id(id)) {
            return Err(ResolveError::InvalidInput(format!(
                "malformed entity id {:?}",
                bad
            )));
        }
        let mut ledger = Ledger::new(&ids)?;
        let policy = self.client.policy().clone();

        for chunk in ledger.pending().chunks(self.chunk_size) {
            let batch: Vec<&str> = chunk.iter().map(|&p| ledger.requested(p)).collect();
            let query = self.queries.ids(&batch)?;
            let Some(bindings) = fetch(&self.client, &query, &policy).await? else {
                continue;
            };
            for candidate in aggregate(&bindings) {
                let position = candidate
                    .record
                    .id
                    .as_deref()
                    .and_then(|id| ledger.position(id));
                if let Some(position) = position {
                    ledger.resolve(position, candidate.record, Strategy::ById);
                }
            }
        }

        let mut work = Vec::new();
        for position in ledger.pending() {
            let query = self.queries.ids(&[ledger.requested(position)])?;
            work.push((position, vec![(Strategy::ById, query)]));
        }
        if !work.is_empty() {
            log::info!("reconcile: fetching {} ids individually", work.len());
            self.per_name(&mut ledger, work, &policy).await?;
        }
        ledger.give_up_pending();
        Ok(ledger.into_result())
    }

    /// Round 1. A label matched by more than one entity stays PENDING.
    pub(crate) async fn batch_round(
        &self,
        ledger: &mut Ledger,
        policy: &RetryPolicy,
    ) -> Result<(), ResolveError> {
        let pending = ledger.pending();
        let language = self.queries.default_language();

        for chunk in pending.chunks(self.chunk_size) {
            let names: Vec<&str> = chunk.iter().map(|&p| ledger.requested(p)).collect();
            let query = self.queries.batch(&names, language)?;
            let Some(bindings) = fetch(&self.client, &query, policy).await? else {
                continue;
            };

            let mut by_request: HashMap<usize, Vec<Binding>> = HashMap::new();
            for binding in bindings {
                let position = binding
                    .get("personLabel")
                    .and_then(|label| ledger.position(&label.value));
                match position {
                    Some(position) => by_request.entry(position).or_default().push(binding),
                    None => log::debug!("reconcile: dropping batch row for an unrequested label"),
                }
            }

            for &position in chunk {
                let Some(rows) = by_request.remove(&position) else {
                    continue;
                };
                let mut candidates = aggregate(&rows);
                if candidates.len() > 1 {
                    log::debug!(
                        "reconcile: {:?} matched {} entities, retrying alone",
                        ledger.requested(position),
                        candidates.len()
                    );
                    continue;
                }
                if let Some(candidate) = candidates.pop() {
                    ledger.resolve(position, candidate.record, Strategy::Batch);
                }
            }
        }
        Ok(())
    }

    /// Round 2.
    pub(crate) async fn single_round(
        &self,
        ledger: &mut Ledger,
        policy: &RetryPolicy,
    ) -> Result<(), ResolveError> {
        let language = self.queries.default_language();
        let mut work = Vec::new();
        for position in ledger.pending() {
            let query = self.queries.person(ledger.requested(position), language)?;
            work.push((position, vec![(Strategy::Single, query)]));
        }
        if work.is_empty() {
            return Ok(());
        }
        log::info!("reconcile: retrying {} names individually", work.len());
        self.per_name(ledger, work, policy).await
    }

    /// Round 3. Whatever is still PENDING afterwards is UNRESOLVED.
    pub(crate) async fn fallback_round(
        &self,
        ledger: &mut Ledger,
        languages: &[String],
        policy: &RetryPolicy,
    ) -> Result<(), ResolveError> {
        let mut work = Vec::new();
        if !languages.is_empty() {
            for position in ledger.pending() {
                let mut attempts = Vec::with_capacity(languages.len());
                for (rank, language) in languages.iter().enumerate() {
                    let query = self.queries.person(ledger.requested(position), language)?;
                    attempts.push((Strategy::Fallback(rank), query));
                }
                work.push((position, attempts));
            }
        }
        if !work.is_empty() {
            log::info!(
                "reconcile: trying {} names in {} fallback languages",
                work.len(),
                languages.len()
            );
            self.per_name(ledger, work, policy).await?;
        }

        let given_up = ledger.give_up_pending();
        if given_up > 0 {
            log::info!("reconcile: {} names unresolved after fallback", given_up);
        }
        Ok(())
    }

    /// Run each request's attempts, sequentially or on the bounded worker pool.
    /// Results land by request position, so completion order does not matter.
    async fn per_name(
        &self,
        ledger: &mut Ledger,
        work: Vec<(usize, Attempts)>,
        policy: &RetryPolicy,
    ) -> Result<(), ResolveError> {
        if self.concurrency <= 1 || work.len() <= 1 {
            for (position, attempts) in work {
                if let Some((record, strategy)) = first_hit(&self.client, &attempts, policy).await? {
                    ledger.resolve(position, record, strategy);
                }
            }
            return Ok(());
        }

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        for (position, attempts) in work {
            let client = Arc::clone(&self.client);
            let permits = Arc::clone(&permits);
            let policy = policy.clone();
            workers.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| ResolveError::Worker(e.to_string()))?;
                let hit = first_hit(&client, &attempts, &policy).await?;
                Ok::<_, ResolveError>((position, hit))
            });
        }

        // Returning early drops the set, which aborts the remaining workers.
        while let Some(joined) = workers.join_next().await {
            let (position, hit) = joined.map_err(|e| ResolveError::Worker(e.to_string()))??;
            if let Some((record, strategy)) = hit {
                ledger.resolve(position, record, strategy);
            }
        }
        Ok(())
    }

    /// Validated fallback list. The default language already had its turn.
    fn fallbacks(&self, requested: Option<&[String]>) -> Result<Vec<String>, ResolveError> {
        let languages = requested.unwrap_or(&self.fallback_languages);
        let mut out: Vec<String> = Vec::with_capacity(languages.len());
        for language in languages {
            validate_language(language)?;
            if language != self.queries.default_language() && !out.contains(language) {
                out.push(language.clone());
            }
        }
        Ok(out)
    }

    fn policy(&self, max_retries: Option<u32>) -> RetryPolicy {
        match max_retries {
            Some(retries) => self.client.policy().with_retries(retries),
            None => self.client.policy().clone(),
        }
    }
}
