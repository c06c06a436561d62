//! Models module.
pub mod factorization;

/// The user representation used by biased factorization models: a latent
/// vector plus a scalar bias added to every item score.
#[derive(Clone, Debug, PartialEq)]
pub struct BiasedUser {
    /// Latent query vector.
    pub embedding: Vec<f32>,
    /// Query bias.
    pub bias: f32,
}
