// src/noyau/lecture.rs
//
// Lecture décimale tronquée
// -------------------------
// - entier "scalé" (×10^n) -> texte "[-]ent.frac" (toujours avec le point)
// - repérage MSD / LSD dans une chaîne de résultat
// - correction 9999 -> 0000 entre deux précisions (unflip)
// - séparateurs de milliers, exposant "E" collé

use num_bigint::BigInt;
use tracing::error;

use super::reel::UnifiedReal;

/// Index MSD "inconnu / inexistant".
pub const MSD_INVALIDE: i32 = i32::MAX;

/// Décalage LSD d'une valeur exactement nulle.
pub const LSD_ZERO: i32 = i32::MIN;

/// Décalage LSD d'un développement infini.
pub const LSD_INFINI: i32 = i32::MAX;

/// Points de suspension (résultats abrégés).
pub const ELLIPSE: char = '…';

/* ------------------------ Décimal (scaled -> texte) ------------------------ */

/// Convertit |valeur|×10^n (tronqué) en texte décimal, avec au moins un chiffre
/// avant le point. Le point est présent même pour n = 0.
pub fn chiffres_tronques(negatif: bool, scaled: &BigInt, n: usize) -> String {
    let mut digits = scaled.to_str_radix(10);
    if digits.len() < n + 1 {
        let zeros = "0".repeat(n + 1 - digits.len());
        digits.insert_str(0, &zeros);
    }
    let coupe = digits.len() - n;
    let signe = if negatif { "-" } else { "" };
    format!("{signe}{}.{}", &digits[..coupe], &digits[coupe..])
}

/* ------------------------ MSD / LSD ------------------------ */

/// Index du premier chiffre non nul, ou MSD_INVALIDE si la chaîne ne contient que
/// des zéros, ou un seul 1 final (qui peut encore devenir 0 en précision supérieure).
pub fn msd_index_of(s: &str) -> i32 {
    let octets = s.as_bytes();
    let non_nul = octets
        .iter()
        .position(|&c| c != b'-' && c != b'.' && c != b'0');
    match non_nul {
        Some(i) if i < octets.len() - 1 || octets[i] != b'1' => i as i32,
        _ => MSD_INVALIDE,
    }
}

/// Décalage (relatif au point) du dernier chiffre non nul, si la valeur a un
/// développement fini ; LSD_INFINI sinon, LSD_ZERO pour zéro.
pub fn lsd_offset(val: &UnifiedReal, cache: &str, dec_index: usize) -> i32 {
    if val.definitely_zero() {
        return LSD_ZERO;
    }
    let mut result = val.digits_required();
    if result == 0 {
        // Entier : on remonte les zéros de la partie entière.
        let octets = cache.as_bytes();
        let mut i: i32 = -1;
        while dec_index as i32 + i > 0 && octets[(dec_index as i32 + i) as usize] == b'0' {
            i -= 1;
        }
        result = i;
    }
    result
}

/* ------------------------ Réévaluation : 9999 -> 0000 ------------------------ */

/// Raccorde deux troncatures successives d'une même valeur.
///
/// Une troncature plus fine peut révéler que les 9 finaux affichés auparavant
/// "basculent" en 0 ; on garde alors les 9 (l'ancienne troncature reste juste).
/// Toute autre incohérence est une violation d'invariant : journalisée, et la
/// nouvelle chaîne est conservée.
pub fn unflip_zeroes(old_digs: &str, old_prec: i32, new_digs: &str, new_prec: i32) -> String {
    let old = old_digs.as_bytes();
    if old.last() != Some(&b'9') {
        return new_digs.to_string();
    }
    let neuf = new_digs.as_bytes();
    let prec_diff = (new_prec - old_prec).max(0) as usize;
    if neuf.len() < prec_diff + 1 {
        return new_digs.to_string();
    }
    let old_last_in_new = neuf.len() - 1 - prec_diff;
    if neuf[old_last_in_new] != b'0' {
        return new_digs.to_string();
    }
    if neuf[neuf.len() - prec_diff..].iter().any(|&c| c != b'0') {
        error!(
            ancien = old_digs,
            nouveau = new_digs,
            "nouvelle approximation incompatible avec l'ancienne"
        );
        return new_digs.to_string();
    }
    format!("{old_digs}{}", "9".repeat(prec_diff))
}

/* ------------------------ Séparateurs / exposant ------------------------ */

/// Insère des virgules tous les 3 chiffres dans s[debut..fin] (partie entière).
pub fn add_commas(s: &str, debut: usize, fin: usize) -> String {
    let octets = s.as_bytes();
    let mut courant = debut;
    while courant < fin && (octets[courant] == b'-' || octets[courant] == b' ') {
        courant += 1;
    }
    let mut out = String::with_capacity(fin - debut + (fin - debut) / 3);
    out.push_str(&s[debut..courant]);
    while courant < fin {
        out.push(octets[courant] as char);
        courant += 1;
        if (fin - courant) % 3 == 0 && fin != courant {
            out.push(',');
        }
    }
    out
}

/// Longueur maximale d'un exposant collé ("E-123").
const MAX_EXP_CHARS: usize = 8;

/// Fin d'un exposant "E[-]chiffres" commençant à `offset`, ou `offset` s'il n'y en a pas.
pub fn exponent_end(s: &str, offset: usize) -> usize {
    let o = s.as_bytes();
    let len = o.len();
    let mut i = offset;
    if len == 0 || i >= len - 1 || o[i] != b'E' {
        return offset;
    }
    i += 1;
    if o[i] == b'-' {
        i += 1;
    }
    if i == len || !o[i].is_ascii_digit() {
        return offset;
    }
    i += 1;
    while i < len && o[i].is_ascii_digit() {
        i += 1;
        if i > offset + MAX_EXP_CHARS {
            return offset;
        }
    }
    i
}

/// Valeur signée de l'exposant s[debut..fin] ("E-12" -> -12).
pub fn exposant_depuis_texte(s: &str, debut: usize, fin: usize) -> i32 {
    let o = s.as_bytes();
    let mut i = debut + 1;
    let mut signe = 1;
    if i < fin && o[i] == b'-' {
        signe = -1;
        i += 1;
    }
    let mut exp: i32 = 0;
    while i < fin {
        exp = exp.saturating_mul(10).saturating_add((o[i] - b'0') as i32);
        i += 1;
    }
    signe * exp
}
