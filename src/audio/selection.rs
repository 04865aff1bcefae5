//! Selección aleatoria sin repetición inmediata.
//!
//! Cada ámbito (guild o pack dentro de una guild) guarda el conjunto de
//! identidades ya reproducidas. Un candidato no vuelve a salir hasta que
//! todos los del pool actual salieron una vez.

use dashmap::DashMap;
use rand::{seq::SliceRandom, Rng};
use serenity::model::id::GuildId;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// `random` sobre todos los descriptores.
    Guild(GuildId),
    /// Archivos miembros de un pack.
    Pack { guild: GuildId, pack: String },
}

#[derive(Debug, Default)]
pub struct RandomSelector {
    played: DashMap<ScopeKey, HashSet<String>>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elige un candidato. `identity` da la identidad de cada candidato
    /// (el archivo resuelto). Devuelve `None` si no hay candidatos.
    pub fn pick<T, F>(&self, scope: ScopeKey, candidates: Vec<T>, identity: F) -> Option<T>
    where
        F: Fn(&T) -> String,
    {
        self.pick_with(&mut rand::thread_rng(), scope, candidates, identity)
    }

    pub fn pick_with<T, F, R>(
        &self,
        rng: &mut R,
        scope: ScopeKey,
        mut candidates: Vec<T>,
        identity: F,
    ) -> Option<T>
    where
        F: Fn(&T) -> String,
        R: Rng + ?Sized,
    {
        if candidates.is_empty() {
            return None;
        }

        let mut played = self.played.entry(scope.clone()).or_default();

        // Ciclo completo: todos salieron, se empieza de nuevo
        if candidates.iter().all(|c| played.contains(&identity(c))) {
            debug!("🔁 Ciclo aleatorio completo para {:?}", scope);
            played.clear();
        }

        // Sacar al azar del pool hasta dar con uno no reproducido
        candidates.shuffle(rng);
        let position = candidates
            .iter()
            .position(|c| !played.contains(&identity(c)))?;
        let chosen = candidates.swap_remove(position);
        played.insert(identity(&chosen));
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    fn pool(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("file_{i}.mp3")).collect()
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let selector = RandomSelector::new();
        assert!(selector
            .pick(ScopeKey::Guild(guild()), Vec::<String>::new(), |s| s.clone())
            .is_none());
    }

    #[test]
    fn test_cycles_through_every_candidate_before_repeating() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in 1..=12 {
            let selector = RandomSelector::new();
            let scope = ScopeKey::Guild(guild());

            let seen: HashSet<String> = (0..n)
                .map(|_| {
                    selector
                        .pick_with(&mut rng, scope.clone(), pool(n), |s| s.clone())
                        .unwrap()
                })
                .collect();
            assert_eq!(seen.len(), n, "pool de {n} debe recorrerse completo");

            // Una selección más: exactamente una repetición
            let extra = selector
                .pick_with(&mut rng, scope.clone(), pool(n), |s| s.clone())
                .unwrap();
            assert!(seen.contains(&extra));
        }
    }

    #[test]
    fn test_single_item_pool_never_gets_stuck() {
        let selector = RandomSelector::new();
        let scope = ScopeKey::Guild(guild());
        for _ in 0..5 {
            let item = selector.pick(scope.clone(), vec!["only.mp3".to_string()], |s| s.clone());
            assert_eq!(item.as_deref(), Some("only.mp3"));
        }
    }

    #[test]
    fn test_stale_identities_are_inert() {
        let selector = RandomSelector::new();
        let scope = ScopeKey::Guild(guild());

        let first = selector.pick(scope.clone(), pool(3), |s| s.clone()).unwrap();

        // El archivo elegido desaparece del pool
        let remaining: Vec<String> = pool(3).into_iter().filter(|f| *f != first).collect();
        let a = selector.pick(scope.clone(), remaining.clone(), |s| s.clone()).unwrap();
        let b = selector.pick(scope.clone(), remaining.clone(), |s| s.clone()).unwrap();
        assert_ne!(a, b);

        // Pool agotado con la identidad vieja todavía registrada: reinicia
        let c = selector.pick(scope.clone(), remaining.clone(), |s| s.clone());
        assert!(c.is_some());
    }

    #[test]
    fn test_scopes_are_independent() {
        let selector = RandomSelector::new();
        let guild_scope = ScopeKey::Guild(guild());
        let pack_scope = ScopeKey::Pack {
            guild: guild(),
            pack: "lofi".into(),
        };
        let one = vec!["a.mp3".to_string()];

        selector.pick(guild_scope.clone(), one.clone(), |s| s.clone());
        // El otro ámbito no ve la selección anterior
        let picked = selector.pick(pack_scope, vec!["a.mp3".to_string(), "b.mp3".to_string()], |s| s.clone());
        assert!(picked.is_some());
        assert_eq!(selector.played.len(), 2);
    }
}
