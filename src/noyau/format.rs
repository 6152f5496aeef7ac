// src/noyau/format.rs
//
// Mise en forme des résultats
// ---------------------------
// - CharMetricsInfo : largeur disponible (fournie par l'affichage)
// - preferred_prec  : précision initiale affichée (entier exact, décimal fini, ou MSD à gauche)
// - abreger / short_string : forme courte "3.33333…", "1.5E-11", "0.00000…"
//
// Toutes les positions sont des index dans la chaîne "[-]ent.frac" du cache.

use super::config::MoteurConfig;
use super::lecture::{add_commas, ELLIPSE, LSD_INFINI, MSD_INVALIDE};

/// Capacités d'affichage (largeurs en nombre de chiffres).
///
/// Avant que l'affichage ne soit dimensionné, les valeurs peuvent être nulles.
pub trait CharMetricsInfo: Send + Sync {
    fn max_chars(&self) -> i32;
    /// Coût (fractionnaire) des séparateurs de milliers pour s[..len].
    fn separator_chars(&self, s: &str, len: usize) -> f32;
    /// Place gagnée quand on n'affiche pas de point décimal.
    fn decimal_credit(&self) -> f32;
    /// Place gagnée quand on n'affiche pas de points de suspension.
    fn no_ellipsis_credit(&self) -> f32;
}

/// Affichage à chasse fixe : un caractère par colonne, virgule comprise.
#[derive(Clone, Copy, Debug)]
pub struct MetriquesTerminal {
    pub colonnes: i32,
}

impl Default for MetriquesTerminal {
    fn default() -> Self {
        Self { colonnes: 100 }
    }
}

impl CharMetricsInfo for MetriquesTerminal {
    fn max_chars(&self) -> i32 {
        self.colonnes
    }

    fn separator_chars(&self, s: &str, len: usize) -> f32 {
        let octets = &s.as_bytes()[..len.min(s.len())];
        let debut = octets
            .iter()
            .position(u8::is_ascii_digit)
            .unwrap_or(octets.len());
        let n = (octets.len() - debut) as i32;
        if n <= 0 {
            return 0.0;
        }
        ((n - 1) / 3) as f32
    }

    fn decimal_credit(&self) -> f32 {
        0.0
    }

    fn no_ellipsis_credit(&self) -> f32 {
        0.0
    }
}

fn index_point(cache: &str) -> i32 {
    cache.find('.').unwrap_or(cache.len()) as i32
}

/// Sous-chaîne [a, b) bornée à la chaîne.
fn tranche(s: &str, a: i32, b: i32) -> &str {
    let len = s.len() as i32;
    let a = a.clamp(0, len) as usize;
    let b = b.clamp(0, len) as usize;
    if a >= b {
        ""
    } else {
        &s[a..b]
    }
}

fn chiffre(s: &str, i: i32) -> &str {
    tranche(s, i, i + 1)
}

/// Décalage de précision préféré pour l'affichage initial.
///
/// - entier exact qui tient : -1 (pas de point)
/// - décimal fini qui tient : son dernier chiffre
/// - sinon : MSD en tête, la notation scientifique éventuelle tenant dans la ligne
pub fn preferred_prec(
    cache: &str,
    msd: i32,
    last_digit_offset: i32,
    cm: &dyn CharMetricsInfo,
    cfg: &MoteurConfig,
) -> i32 {
    let ligne = cm.max_chars();
    let entier = index_point(cache);
    let sep_brut = cm.separator_chars(cache, entier as usize);
    let sep_brut_sans_point = sep_brut - cm.no_ellipsis_credit();
    let sep_brut_avec_point = sep_brut_sans_point - cm.decimal_credit();
    let sep_sans_point = sep_brut_sans_point.max(0.0).ceil() as i32;
    let sep_avec_point = sep_brut_avec_point.max(0.0).ceil() as i32;
    let negatif = i32::from(cache.starts_with('-'));

    let lsd = if last_digit_offset == 0 { -1 } else { last_digit_offset };
    if lsd != LSD_INFINI {
        if entier <= ligne - sep_sans_point && lsd <= 0 {
            return -1;
        }
        if lsd >= 0 && entier + lsd + 1 <= ligne - sep_avec_point {
            return lsd;
        }
    }

    let mut msd = msd;
    if msd > entier && msd <= entier + cfg.exp_cost + 1 {
        // quelques zéros en tête : pas de notation scientifique
        msd = entier - 1;
    }
    if msd > cfg.quick_max_result_bits {
        // zéro probable mais incertain : "0.000…" plutôt qu'un exposant énorme
        return ligne - 2;
    }
    let mut result = msd - entier + ligne - negatif - 1;
    if entier <= ligne - sep_sans_point {
        if entier < ligne - sep_avec_point {
            result -= sep_avec_point;
        } else {
            result -= sep_sans_point;
        }
    }
    result
}

/// Forme courte de la valeur en `cache`, visant `cible` caractères.
pub fn abreger(cache: &str, msd_index: i32, lsd_offset: i32, cible: i32, cfg: &MoteurConfig) -> String {
    let point = index_point(cache);
    let negatif = i32::from(cache.starts_with('-'));
    let signe = if negatif == 1 { "-" } else { "" };
    let mut msd = msd_index;
    let mut lsd = lsd_offset;

    if msd >= cache.len() as i32 - cible {
        msd = MSD_INVALIDE;
    }
    if msd == MSD_INVALIDE {
        return if lsd < cfg.init_prec {
            "0".to_string()
        } else {
            format!("0.00000{ELLIPSE}")
        };
    }
    // Entier avec quelques zéros finaux : pas d'exposant
    if lsd < -1 && point - msd + negatif <= cible && lsd >= -cfg.max_trailing_zeroes - 1 {
        lsd = -1;
    }
    if msd > point {
        if msd <= point + cfg.exp_cost + 1 {
            msd = point - 1;
        } else if lsd <= cible - negatif - 2 && lsd <= cfg.max_leading_zeroes + 1 {
            // fraction qui tient en entier
            msd = point - 1;
        }
    }
    let mut exposant = point - msd;
    if exposant > 0 {
        exposant -= 1;
    }

    if lsd != LSD_INFINI {
        let lsd_index = point + lsd;
        let total = lsd_index - msd + negatif + 1;
        if total <= cible && point > msd && lsd >= -1 {
            return format!(
                "{signe}{}{}",
                add_commas(cache, msd as usize, point as usize),
                tranche(cache, point, lsd_index + 1)
            );
        }
        if total <= cible - 3 {
            return format!(
                "{signe}{}.{}E{exposant}",
                chiffre(cache, msd),
                tranche(cache, msd + 1, lsd_index + 1)
            );
        }
    }

    // Il faut abréger
    if point > msd && point < msd + cible - negatif - 1 {
        return format!(
            "{signe}{}{}{ELLIPSE}",
            add_commas(cache, msd as usize, point as usize),
            tranche(cache, point, msd + cible - negatif - 1)
        );
    }
    format!(
        "{signe}{}.{}{ELLIPSE}E{exposant}",
        chiffre(cache, msd),
        tranche(cache, msd + 1, msd + cible - negatif - 4)
    )
}

/// Abréviation historique / mémoire.
pub fn short_string(cache: &str, msd_index: i32, lsd_offset: i32, cfg: &MoteurConfig) -> String {
    abreger(cache, msd_index, lsd_offset, cfg.short_target_length, cfg)
}
