//! Noyau exact
//!
//! Organisation interne :
//! - erreurs.rs          : CalcError (propagée) + ErrorKind (vu par l'écouteur)
//! - rationnel.rs        : BoundedRational (fractions plafonnées)
//! - reel_constructif.rs : Cr, réels constructifs paresseux + interruption coopérative
//! - constantes.rs       : constantes nommées (π, e, √k, ln k) et leurs relations
//! - reel.rs             : UnifiedReal = rationnel × facteur
//! - fonctions.rs / trig.rs : ln, exp, puissances, factorielle, trigonométrie
//! - jetons.rs / expr.rs : touches, jetons, expression éditable et sérialisée
//! - eval.rs             : descente récursive + résolution des références
//! - lecture.rs / format.rs : chaînes décimales, MSD/LSD, formes courtes
//! - config.rs           : seuils du moteur (TOML)
//! - stockage.rs         : frontière de persistance des expressions archivées
//! - taches.rs           : horloge, ordonnanceur, poignées de tâche
//! - moteur.rs           : évaluation asynchrone, annulable, à précision croissante

pub mod config;
pub mod constantes;
pub mod erreurs;
pub mod eval;
pub mod expr;
pub mod fonctions;
pub mod format;
pub mod jetons;
pub mod lecture;
pub mod moteur;
pub mod rationnel;
pub mod reel;
pub mod reel_constructif;
pub mod stockage;
pub mod taches;
pub mod trig;

#[cfg(test)]
mod tests_scientifiques;

#[cfg(test)]
mod tests_fuzz_safe;

// API publique minimale
pub use config::MoteurConfig;
pub use erreurs::{CalcError, ErrorKind, Resultat};
pub use moteur::{EvaluationListener, Moteur, Rappel, HISTORY_MAIN_INDEX, MAIN_INDEX};
pub use reel::UnifiedReal;
