// src/noyau/fonctions.rs
//
// ln / exp / puissances / factorielle sur UnifiedReal
// ---------------------------------------------------
// - ln des puissances entières de 2,3,5,6,7,10 (et de leurs racines) : exact
// - exp de k·ln n : rationnel exact (ou racine si k demi-entier)
// - x^n entier : carrés successifs sur le rationnel, sinon exp(n·ln x)
// - résultat de plus de 2^28 bits (partie entière) : TimedOut, sans rien construire
// - n! : produit scindé, argument entier vérifié à tolérance

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::constantes::{ConstanteNommee, PETITS_ENTIERS};
use super::erreurs::{CalcError, Resultat};
use super::rationnel::BoundedRational;
use super::reel::{Facteur, UnifiedReal, TOLERANCE_COMPARAISON};
use super::reel_constructif::{verifier_interruption, Cr};

/// Bits maximum de l'argument de la factorielle (au-delà : trop long de toute façon).
const FACT_BITS_MAX: u64 = 20;

/// Partie entière au-delà de laquelle aucune approximation n'est calculable.
const BITS_RESULTAT_MAX: f64 = (1u64 << 28) as f64;

/// TimedOut si |x|^y a sûrement plus de BITS_RESULTAT_MAX bits de partie entière.
fn borner_puissance(x: &Cr, y: f64) -> Resultat<()> {
    let log2_x = match x.msd(-60)? {
        Some(m) if m > 60 => (m - 1) as f64,
        Some(_) => x.to_f64()?.abs().log2(),
        None => return Ok(()),
    };
    if y * log2_x > BITS_RESULTAT_MAX {
        Err(CalcError::TimedOut)
    } else {
        Ok(())
    }
}

/* ------------------------ Outils entiers ------------------------ */

/// n^16 (n <= 10)
fn pow16(n: u32) -> u64 {
    let mut r = (n as u64) * (n as u64);
    r *= r;
    r *= r;
    r *= r;
    r
}

/// k tel que n = base^k, ou 0 si n n'est pas une puissance entière de base.
fn int_log(n: &BigInt, base: u32) -> Resultat<i64> {
    let approx = n.to_f64().unwrap_or(f64::INFINITY);
    if approx.is_finite() {
        let l = approx.ln() / (base as f64).ln();
        if (l - l.round()).abs() > 1.0e-6 {
            return Ok(0);
        }
    }
    let grande_base = BigInt::from(base);
    let base16 = BigInt::from(pow16(base));
    let mut reste = n.clone();
    let mut k: i64 = 0;
    while !reste.is_zero() && (&reste % &grande_base).is_zero() {
        verifier_interruption()?;
        reste /= &grande_base;
        k += 1;
        while (&reste % &base16).is_zero() {
            reste /= &base16;
            k += 16;
        }
    }
    Ok(if reste.is_one() { k } else { 0 })
}

/// n·(n-pas)·(n-2·pas)... en produit scindé (profondeur logarithmique).
fn factorielle_generale(n: i64, pas: i64) -> Resultat<BigInt> {
    if n > 4 * pas {
        let p1 = factorielle_generale(n, 2 * pas)?;
        verifier_interruption()?;
        let p2 = factorielle_generale(n - pas, 2 * pas)?;
        verifier_interruption()?;
        return Ok(p1 * p2);
    }
    if n == 0 {
        return Ok(BigInt::one());
    }
    let mut r = BigInt::from(n);
    let mut i = n - pas;
    while i > 1 {
        r *= i;
        i -= pas;
    }
    Ok(r)
}

/* ------------------------ ln / exp ------------------------ */

impl UnifiedReal {
    pub fn ln(&self) -> Resultat<UnifiedReal> {
        let zero = UnifiedReal::zero();
        if self.is_comparable(&zero)? {
            if self.signum()? <= 0 {
                return Err(CalcError::domain("ln d'un nombre non positif"));
            }
            let un = UnifiedReal::one();
            let c = self.compare_to_a(&un, TOLERANCE_COMPARAISON)?;
            if c == 0 {
                if self.definitely_equals(&un)? {
                    return Ok(zero);
                }
            } else if c < 0 {
                return Ok(self.inverse()?.ln()?.negate());
            }
            if let Some(b) = self.rat.as_big_integer() {
                if let Some(v) = self.ln_puissance(&b)? {
                    return Ok(v);
                }
            }
        }
        Ok(UnifiedReal::opaque(self.cr_value().ln()?))
    }

    /// ln exact de b·facteur quand b est une puissance d'un petit entier.
    fn ln_puissance(&self, b: &BigInt) -> Resultat<Option<UnifiedReal>> {
        match self.facteur.nomme() {
            Some(ConstanteNommee::Un) => {
                for n in PETITS_ENTIERS {
                    let k = int_log(b, n as u32)?;
                    if k != 0 {
                        return Ok(Some(UnifiedReal::nomme(
                            BoundedRational::from(k),
                            ConstanteNommee::Ln(n),
                        )));
                    }
                }
                Ok(None)
            }
            Some(ConstanteNommee::Racine(n)) => {
                // ln(n^k·√n) = (k + 1/2)·ln n
                let k = if b.is_one() { 0 } else { int_log(b, n as u32)? };
                if k == 0 && !b.is_one() {
                    return Ok(None);
                }
                let coeff = BoundedRational::from(k).add(&BoundedRational::new(1, 2));
                Ok(coeff.map(|c| UnifiedReal::nomme(c, ConstanteNommee::Ln(n))))
            }
            _ => Ok(None),
        }
    }

    pub fn exp(&self) -> Resultat<UnifiedReal> {
        if self.definitely_equals(&UnifiedReal::zero())? {
            return Ok(UnifiedReal::one());
        }
        if self.definitely_equals(&UnifiedReal::one())? {
            return Ok(UnifiedReal::e());
        }
        if let Some(n) = self.facteur.nomme().and_then(ConstanteNommee::exp_de) {
            if self.rat.signum() < 0 {
                return self.negate().exp()?.inverse();
            }
            // exp(r·ln n) = n^r, r entier ou demi-entier
            let (exposant, racine) = match self.rat.as_big_integer() {
                Some(_) => (Some(self.rat.clone()), false),
                None => (self.rat.multiply(&BoundedRational::from(2)), true),
            };
            if let Some(exposant) = exposant {
                let base = BoundedRational::from(n as i64);
                if let Some(p) = BoundedRational::pow_rationnel(&base, &exposant)? {
                    let r = UnifiedReal::rationnel(p);
                    return if racine { r.sqrt() } else { Ok(r) };
                }
            }
        }
        let x = self.cr_value();
        if x.to_f64()? * std::f64::consts::LOG2_E > BITS_RESULTAT_MAX {
            return Err(CalcError::TimedOut);
        }
        Ok(UnifiedReal::opaque(x.exp()?))
    }

    /* ------------------------ Puissances ------------------------ */

    /// x^n, n entier.
    fn pow_entier(&self, n: &BigInt) -> Resultat<UnifiedReal> {
        if n.is_negative() {
            // (1/x)^n : un résultat minuscule ne passe pas par un intermédiaire gigantesque
            return self.inverse()?.pow_entier(&-n);
        }
        if n.is_one() {
            return Ok(self.clone());
        }
        if n.is_zero() {
            return Ok(UnifiedReal::one());
        }
        if self.facteur.est_un() {
            if let Some(p) = self.rat.pow(n)? {
                return Ok(UnifiedReal::rationnel(p));
            }
        }
        // (r·√k)^n = r^n · k^(n/2) [· √k si n impair]
        if let Some(carre) = self.facteur.nomme().and_then(ConstanteNommee::carre) {
            let k = BoundedRational::from(carre as i64);
            let r = self.rat.pow(n)?;
            let kp = k.pow(&(n >> 1usize))?;
            if let Some(p) = r.zip(kp).and_then(|(r, kp)| r.multiply(&kp)) {
                return Ok(if n.bit(0) {
                    UnifiedReal::new(p, self.facteur.clone())
                } else {
                    UnifiedReal::rationnel(p)
                });
            }
        }
        match self.signum_a(TOLERANCE_COMPARAISON)? {
            s if s > 0 => {
                let x = self.cr_value();
                borner_puissance(&x, n.to_f64().unwrap_or(f64::INFINITY))?;
                let l = x.ln()?;
                Ok(UnifiedReal::opaque(l.multiply(&Cr::entier(n.clone())).exp()?))
            }
            s if s < 0 => {
                let p = self.negate().pow_entier(n)?;
                Ok(if n.bit(0) { p.negate() } else { p })
            }
            // |x| < 2^-1000 : pas de logarithme, un seul nœud de puissance
            _ => Ok(UnifiedReal::opaque(self.cr_value().pow_entier(n))),
        }
    }

    /// x^y
    pub fn pow(&self, y: &UnifiedReal) -> Resultat<UnifiedReal> {
        if let Facteur::Nomme(ConstanteNommee::E) = self.facteur {
            if self.rat == BoundedRational::one() {
                return y.exp();
            }
            let partie_rat = UnifiedReal::rationnel(self.rat.clone()).pow(y)?;
            return Ok(y.exp()?.multiply(&partie_rat));
        }
        if let Some(r) = y.bounded_rational_value() {
            if let Some(n) = r.as_big_integer() {
                return self.pow_entier(&n);
            }
            let double = r.multiply(&BoundedRational::from(2));
            if let Some(n) = double.and_then(|d| d.as_big_integer()) {
                return self.pow_entier(&n)?.sqrt();
            }
        }
        if self.definitely_zero() {
            return match y.signum_a(TOLERANCE_COMPARAISON)? {
                s if s > 0 => Ok(UnifiedReal::zero()),
                s if s < 0 => Err(CalcError::DivisionByZero),
                _ => Err(CalcError::domain("0^0")),
            };
        }
        let x = self.cr_value();
        let l = x.ln()?;
        borner_puissance(&x, y.cr_value().to_f64()?)?;
        Ok(UnifiedReal::opaque(l.multiply(&y.cr_value()).exp()?))
    }

    /* ------------------------ Factorielle ------------------------ */

    pub fn fact(&self) -> Resultat<UnifiedReal> {
        let n = match self.big_integer_value() {
            Some(n) => n,
            None => {
                let n = self.cr_value().get_appr(0)?;
                let candidat = UnifiedReal::from(n.clone());
                if !self.approx_equals(&candidat, TOLERANCE_COMPARAISON)? {
                    return Err(CalcError::domain("factorielle d'un non-entier"));
                }
                n
            }
        };
        if n.is_negative() {
            return Err(CalcError::domain("factorielle d'un négatif"));
        }
        if n.bits() > FACT_BITS_MAX {
            return Err(CalcError::domain("argument de factorielle trop grand"));
        }
        let n = n.to_i64().unwrap_or(0);
        Ok(UnifiedReal::from(factorielle_generale(n, 1)?))
    }
}
