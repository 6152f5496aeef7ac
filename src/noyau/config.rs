// src/noyau/config.rs
//
// Réglages du moteur
// ------------------
// - délais (ms) : rapide < requis < requis long < hors principal
// - bornes de taille (bits de la partie entière) avant conversion décimale
// - précisions : initiale, escalade du MSD, marges de réévaluation
// - abréviation (historique / mémoire)
//
// Chargement TOML, champs absents = valeurs historiques.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::erreurs::{CalcError, Resultat};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoteurConfig {
    /// Évaluation spéculative (non demandée).
    pub quick_timeout_ms: u64,
    /// Évaluation demandée ("=").
    pub required_timeout_ms: u64,
    /// Évaluation demandée après prolongation accordée.
    pub long_timeout_ms: u64,
    /// Expressions autres que la principale (déjà évaluées une fois).
    pub non_main_timeout_ms: u64,

    pub quick_max_result_bits: i32,
    pub required_max_result_bits: i32,
    pub long_max_result_bits: i32,

    pub init_prec: i32,
    pub max_msd_prec_offset: i32,
    pub extra_digits: i32,
    pub extra_divisor: i32,
    pub precompute_digits: i32,
    pub precompute_divisor: i32,
    /// Coût (en caractères) d'un exposant affiché.
    pub exp_cost: i32,

    pub short_target_length: i32,
    pub max_leading_zeroes: i32,
    pub max_trailing_zeroes: i32,
    pub min_displayed_digits: i32,
}

impl Default for MoteurConfig {
    fn default() -> Self {
        Self {
            quick_timeout_ms: 1_000,
            required_timeout_ms: 2_000,
            long_timeout_ms: 15_000,
            non_main_timeout_ms: 100_000,
            quick_max_result_bits: 150_000,
            required_max_result_bits: 240_000,
            long_max_result_bits: 700_000,
            init_prec: 50,
            max_msd_prec_offset: 1_100,
            extra_digits: 20,
            extra_divisor: 5,
            precompute_digits: 30,
            precompute_divisor: 5,
            exp_cost: 3,
            short_target_length: 8,
            max_leading_zeroes: 6,
            max_trailing_zeroes: 6,
            min_displayed_digits: 5,
        }
    }
}

impl MoteurConfig {
    pub fn depuis_toml(texte: &str) -> Resultat<Self> {
        let cfg: MoteurConfig =
            toml::from_str(texte).map_err(|e| CalcError::Config(e.to_string()))?;
        cfg.valider()?;
        Ok(cfg)
    }

    pub fn charger(chemin: impl AsRef<Path>) -> Resultat<Self> {
        let chemin = chemin.as_ref();
        let texte = fs::read_to_string(chemin)
            .map_err(|e| CalcError::Config(format!("{}: {e}", chemin.display())))?;
        Self::depuis_toml(&texte)
    }

    pub fn vers_toml(&self) -> Resultat<String> {
        toml::to_string_pretty(self).map_err(|e| CalcError::Config(e.to_string()))
    }

    /// Les rôles relatifs des délais et des bornes doivent être respectés.
    pub fn valider(&self) -> Resultat<()> {
        let delais = [
            self.quick_timeout_ms,
            self.required_timeout_ms,
            self.long_timeout_ms,
            self.non_main_timeout_ms,
        ];
        if delais[0] == 0 || delais.windows(2).any(|w| w[0] > w[1]) {
            return Err(CalcError::Config(
                "délais attendus : 0 < rapide ≤ requis ≤ long ≤ hors principal".into(),
            ));
        }
        let bornes = [
            self.quick_max_result_bits,
            self.required_max_result_bits,
            self.long_max_result_bits,
        ];
        if bornes[0] <= 0 || bornes.windows(2).any(|w| w[0] > w[1]) {
            return Err(CalcError::Config(
                "bornes attendues : 0 < rapide ≤ requise ≤ longue".into(),
            ));
        }
        let positifs = [
            ("init_prec", self.init_prec),
            ("extra_divisor", self.extra_divisor),
            ("precompute_divisor", self.precompute_divisor),
            ("short_target_length", self.short_target_length),
        ];
        for (nom, v) in positifs {
            if v <= 0 {
                return Err(CalcError::Config(format!("{nom} doit être > 0")));
            }
        }
        if self.max_msd_prec_offset < self.init_prec {
            return Err(CalcError::Config(
                "max_msd_prec_offset doit être ≥ init_prec".into(),
            ));
        }
        Ok(())
    }

    /// Délai d'une évaluation initiale.
    pub fn delai(&self, requis: bool, long: bool, principal: bool) -> Duration {
        let ms = if !principal {
            self.non_main_timeout_ms
        } else if !requis {
            self.quick_timeout_ms
        } else if long {
            self.long_timeout_ms
        } else {
            self.required_timeout_ms
        };
        Duration::from_millis(ms)
    }

    /// Taille maximale (bits) d'un résultat avant d'abandonner la conversion décimale.
    pub fn max_result_bits(&self, requis: bool, long: bool) -> i32 {
        if !requis {
            self.quick_max_result_bits
        } else if long {
            self.long_max_result_bits
        } else {
            self.required_max_result_bits
        }
    }
}
