use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::Token;
use crate::store::{SharedStore, StoreError};

/// Random bytes per code; rendered as twice as many upper-case hex characters
pub const CODE_BYTES: usize = 5;

pub const MIN_BATCH_SIZE: i64 = 1;

/// Consecutive rounds that may insert nothing before giving up
const MAX_IDLE_ROUNDS: usize = 16;

#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("Quantity must be between 1 and {max}, got {requested}")]
    InvalidQuantity { requested: i64, max: u32 },

    #[error("Random number generator failure")]
    Rng,

    #[error("Could not find free codes after creating {created} tokens")]
    CodeSpaceExhausted { created: usize },

    #[error("Generation stopped after creating {created} tokens: {source}")]
    Interrupted {
        created: usize,
        #[source]
        source: Box<GenerationError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GenerationError {
    /// Tokens that were created and kept before the failure
    pub fn created(&self) -> usize {
        match self {
            GenerationError::CodeSpaceExhausted { created }
            | GenerationError::Interrupted { created, .. } => *created,
            _ => 0,
        }
    }
}

/// Source of candidate token codes
pub trait CodeSource: Send + Sync {
    fn next_code(&self) -> Result<String, GenerationError>;
}

/// Draws codes from the system CSPRNG
pub struct RandomCodeSource {
    rng: SystemRandom,
}

impl RandomCodeSource {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for RandomCodeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSource for RandomCodeSource {
    fn next_code(&self) -> Result<String, GenerationError> {
        let mut bytes = [0u8; CODE_BYTES];
        self.rng.fill(&mut bytes).map_err(|_| GenerationError::Rng)?;
        Ok(hex::encode_upper(bytes))
    }
}

/// Creates batches of tokens with collision-free codes
#[derive(Clone)]
pub struct TokenGenerator {
    store: SharedStore,
    codes: Arc<dyn CodeSource>,
    max_batch_size: u32,
}

impl TokenGenerator {
    pub fn new(store: SharedStore, codes: Arc<dyn CodeSource>, max_batch_size: u32) -> Self {
        Self {
            store,
            codes,
            max_batch_size,
        }
    }

    pub fn max_batch_size(&self) -> u32 {
        self.max_batch_size
    }

    /// Generates `quantity` new tokens.
    ///
    /// Codes already taken, whether found up front or lost to a concurrent
    /// batch at insert time, are replaced by fresh ones instead of failing.
    ///
    /// Tokens are inserted round by round and are not rolled back. A failure
    /// after the first round therefore reports how many tokens were kept, see
    /// [`GenerationError::created`].
    #[tracing::instrument(skip(self))]
    pub async fn generate(
        &self,
        quantity: i64,
        label: Option<&str>,
    ) -> Result<Vec<Token>, GenerationError> {
        if quantity < MIN_BATCH_SIZE || quantity > i64::from(self.max_batch_size) {
            return Err(GenerationError::InvalidQuantity {
                requested: quantity,
                max: self.max_batch_size,
            });
        }

        let wanted = quantity as usize;
        let label = label.map(str::trim).filter(|l| !l.is_empty());
        let mut created: Vec<Token> = Vec::with_capacity(wanted);

        match self.fill(&mut created, wanted, label).await {
            Ok(()) => {
                tracing::info!(count = created.len(), label = ?label, "Tokens generated");
                Ok(created)
            }
            Err(e @ GenerationError::CodeSpaceExhausted { .. }) => Err(e),
            Err(e) if created.is_empty() => Err(e),
            Err(e) => {
                tracing::error!(created = created.len(), error = %e, "Token generation interrupted");
                Err(GenerationError::Interrupted {
                    created: created.len(),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn fill(
        &self,
        created: &mut Vec<Token>,
        wanted: usize,
        label: Option<&str>,
    ) -> Result<(), GenerationError> {
        let mut idle_rounds = 0;

        while created.len() < wanted {
            let mut batch = self.draw_codes(wanted - created.len())?;

            let taken: HashSet<String> = self.store.existing_codes(&batch).await?.into_iter().collect();
            if !taken.is_empty() {
                tracing::debug!(collisions = taken.len(), "Regenerating colliding codes");
                batch.retain(|code| !taken.contains(code));
            }

            let inserted = if batch.is_empty() {
                Vec::new()
            } else {
                self.store.insert_tokens(&batch, label).await?
            };

            if inserted.len() < batch.len() {
                tracing::debug!(
                    lost = batch.len() - inserted.len(),
                    "Codes taken by a concurrent batch, regenerating"
                );
            }

            if inserted.is_empty() {
                idle_rounds += 1;
                if idle_rounds >= MAX_IDLE_ROUNDS {
                    tracing::error!(created = created.len(), "Token code space exhausted");
                    return Err(GenerationError::CodeSpaceExhausted {
                        created: created.len(),
                    });
                }
            } else {
                idle_rounds = 0;
            }

            created.extend(inserted);
        }

        Ok(())
    }

    /// Draws up to `count` distinct candidate codes
    fn draw_codes(&self, count: usize) -> Result<Vec<String>, GenerationError> {
        let mut seen = HashSet::with_capacity(count);
        let mut codes = Vec::with_capacity(count);
        let max_draws = count * 4;
        let mut draws = 0;

        while codes.len() < count && draws < max_draws {
            draws += 1;
            let code = self.codes.next_code()?;
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }

        Ok(codes)
    }
}
