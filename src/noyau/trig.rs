// src/noyau/trig.rs
//
// Trigonométrie sur UnifiedReal (angles "exactement reconnus")
// ------------------------------------------------------------
// - Extraction du multiple de π/12 (mod 24) quand le facteur est π
// - Tables sin/cos sur k·π/12, tan = sin/cos (indéfini en π/2, 3π/2)
// - Réciproques : arguments demi-entiers, √2/2, √3/2, √3/3, √3
// - Sinon : repli numérique (réel constructif)

use num_bigint::BigInt;
use num_traits::{One, ToPrimitive, Zero};

use super::constantes::ConstanteNommee;
use super::erreurs::{CalcError, Resultat};
use super::rationnel::BoundedRational;
use super::reel::{Facteur, UnifiedReal};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrigFn {
    Sin,
    Cos,
    Tan,
    ArcSin,
    ArcCos,
    ArcTan,
}

impl TrigFn {
    /// Fonction réciproque (argument sans unité, résultat en angle).
    pub fn est_reciproque(self) -> bool {
        matches!(self, TrigFn::ArcSin | TrigFn::ArcCos | TrigFn::ArcTan)
    }

    /// Application en radians.
    pub fn appliquer(self, x: &UnifiedReal) -> Resultat<UnifiedReal> {
        match self {
            TrigFn::Sin => x.sin(),
            TrigFn::Cos => x.cos(),
            TrigFn::Tan => x.tan(),
            TrigFn::ArcSin => x.asin(),
            TrigFn::ArcCos => x.acos(),
            TrigFn::ArcTan => x.atan(),
        }
    }
}

/* ------------------------ Valeurs remarquables ------------------------ */

fn rat(n: i64, d: i64) -> BoundedRational {
    BoundedRational::new(n, d)
}

fn demi_racine(n: u8) -> UnifiedReal {
    UnifiedReal::nomme(rat(1, 2), ConstanteNommee::Racine(n))
}

fn fraction_de_pi(n: i64, d: i64) -> UnifiedReal {
    UnifiedReal::nomme(rat(n, d), ConstanteNommee::Pi)
}

/// k tel que x = k·π/12 (mod 2π), si x est un tel multiple.
fn pi_douziemes(x: &UnifiedReal) -> Option<i32> {
    if x.definitely_zero() {
        return Some(0);
    }
    if !matches!(x.facteur(), Facteur::Nomme(ConstanteNommee::Pi)) {
        return None;
    }
    let k = x.rat().multiply(&BoundedRational::from(12))?.as_big_integer()?;
    let vingt_quatre = BigInt::from(24);
    let reste = ((k % &vingt_quatre) + &vingt_quatre) % &vingt_quatre;
    reste.to_i32()
}

/// sin(n·π/12), n ∈ [0, 24), si la valeur est nommable.
fn sin_pi_douziemes(n: i32) -> Option<UnifiedReal> {
    if n >= 12 {
        return sin_pi_douziemes(n - 12).map(|v| v.negate());
    }
    match n {
        0 => Some(UnifiedReal::zero()),
        2 | 10 => Some(UnifiedReal::fraction(1, 2)),
        3 | 9 => Some(demi_racine(2)),
        4 | 8 => Some(demi_racine(3)),
        6 => Some(UnifiedReal::one()),
        _ => None,
    }
}

fn cos_pi_douziemes(n: i32) -> Option<UnifiedReal> {
    sin_pi_douziemes((n + 6) % 24)
}

/// asin(n/2), n ∈ [-2, 2]
fn asin_demis(n: i32) -> Resultat<UnifiedReal> {
    if n < 0 {
        return Ok(asin_demis(-n)?.negate());
    }
    match n {
        0 => Ok(UnifiedReal::zero()),
        1 => Ok(fraction_de_pi(1, 6)),
        2 => Ok(fraction_de_pi(1, 2)),
        _ => Err(CalcError::domain("asin hors de [-1, 1]")),
    }
}

/* ------------------------ Fonctions ------------------------ */

impl UnifiedReal {
    pub fn sin(&self) -> Resultat<UnifiedReal> {
        if let Some(v) = pi_douziemes(self).and_then(sin_pi_douziemes) {
            return Ok(v);
        }
        Ok(UnifiedReal::opaque(self.cr_value().sin()?))
    }

    pub fn cos(&self) -> Resultat<UnifiedReal> {
        if let Some(v) = pi_douziemes(self).and_then(cos_pi_douziemes) {
            return Ok(v);
        }
        Ok(UnifiedReal::opaque(self.cr_value().cos()?))
    }

    pub fn tan(&self) -> Resultat<UnifiedReal> {
        if let Some(k) = pi_douziemes(self) {
            if k == 6 || k == 18 {
                return Err(CalcError::domain("tangente indéfinie"));
            }
            if let (Some(haut), Some(bas)) = (sin_pi_douziemes(k), cos_pi_douziemes(k)) {
                return haut.divide(&bas);
            }
        }
        self.sin()?.divide(&self.cos()?)
    }

    /// Domaine de asin/acos, quand il est décidable.
    fn verifier_domaine_asin(&self) -> Resultat<()> {
        let un = UnifiedReal::one();
        if self.is_comparable(&un)? {
            let hors = self.compare_to(&un)? > 0
                || self.compare_to_a(&un.negate(), super::reel::TOLERANCE_COMPARAISON)? < 0;
            if hors {
                return Err(CalcError::domain("argument hors de [-1, 1]"));
            }
        }
        Ok(())
    }

    fn asin_non_demis(&self) -> Resultat<UnifiedReal> {
        if self.compare_to_a(&UnifiedReal::zero(), -10)? < 0 {
            return Ok(self.negate().asin_non_demis()?.negate());
        }
        if self.definitely_equals(&demi_racine(2))? {
            return Ok(fraction_de_pi(1, 4));
        }
        if self.definitely_equals(&demi_racine(3))? {
            return Ok(fraction_de_pi(1, 3));
        }
        Ok(UnifiedReal::opaque(self.cr_value().asin()?))
    }

    pub fn asin(&self) -> Resultat<UnifiedReal> {
        self.verifier_domaine_asin()?;
        let double = self.multiply(&UnifiedReal::from(2));
        if let Some(demis) = double.big_integer_value() {
            let n = demis
                .to_i32()
                .ok_or_else(|| CalcError::domain("argument hors de [-1, 1]"))?;
            return asin_demis(n);
        }
        self.asin_non_demis()
    }

    pub fn acos(&self) -> Resultat<UnifiedReal> {
        Ok(fraction_de_pi(1, 2).subtract(&self.asin()?))
    }

    pub fn atan(&self) -> Resultat<UnifiedReal> {
        if self.compare_to_a(&UnifiedReal::zero(), -10)? < 0 {
            return Ok(self.negate().atan()?.negate());
        }
        if let Some(b) = self.big_integer_value() {
            if b.is_zero() {
                return Ok(UnifiedReal::zero());
            }
            if b.is_one() {
                return Ok(fraction_de_pi(1, 4));
            }
        }
        let racine3 = UnifiedReal::nomme(BoundedRational::one(), ConstanteNommee::Racine(3));
        if self.definitely_equals(&UnifiedReal::nomme(rat(1, 3), ConstanteNommee::Racine(3)))? {
            return Ok(fraction_de_pi(1, 6));
        }
        if self.definitely_equals(&racine3)? {
            return Ok(fraction_de_pi(1, 3));
        }
        Ok(UnifiedReal::opaque(self.cr_value().atan()?))
    }
}
