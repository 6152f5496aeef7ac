// src/noyau/rationnel.rs
//
// BoundedRational : fraction exacte à taille bornée
// -------------------------------------------------
// - numérateur / dénominateur BigInt, PAS forcément réduits
// - plafond : MAX_SIZE bits (numérateur + dénominateur) après réduction
// - "trop grand" = None (valeur qui existe mais n'est pas représentable), jamais zéro
// - réduction (pgcd) amortie : faite ~1 fois sur 16, ou dès qu'on dépasse le plafond

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use num_bigint::BigInt;
use num_rational::Ratio;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::erreurs::{CalcError, Resultat};
use super::lecture::chiffres_tronques;
use super::reel_constructif::verifier_interruption;

/// Plafond (bits) de numérateur + dénominateur.
pub const MAX_SIZE: u64 = 10_000;

/// Sentinelle "développement décimal infini".
pub const CHIFFRES_INFINIS: i32 = i32::MAX;

#[derive(Clone, Debug)]
pub struct BoundedRational {
    r: Ratio<BigInt>,
}

/* ------------------------ Tirage (réduction amortie) ------------------------ */

static GRAINE: AtomicU64 = AtomicU64::new(0x2545_F491_4F6C_DD1D);

/// Tirage pseudo-aléatoire sans verrou (splitmix64).
fn tirage() -> u32 {
    let x = GRAINE.fetch_add(0x9E37_79B9_7F4A_7C15, AtomicOrdering::Relaxed);
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    ((z ^ (z >> 31)) >> 32) as u32
}

/* ------------------------ Construction ------------------------ */

impl BoundedRational {
    /// Fraction brute (non réduite). Le dénominateur doit être non nul.
    pub fn new(num: impl Into<BigInt>, den: impl Into<BigInt>) -> Self {
        let den = den.into();
        debug_assert!(!den.is_zero(), "dénominateur nul");
        Self {
            r: Ratio::new_raw(num.into(), den),
        }
    }

    pub fn from_integer(n: impl Into<BigInt>) -> Self {
        Self::new(n, 1)
    }

    pub fn zero() -> Self {
        Self::from_integer(0)
    }

    pub fn one() -> Self {
        Self::from_integer(1)
    }

    pub fn numerateur(&self) -> &BigInt {
        self.r.numer()
    }

    pub fn denominateur(&self) -> &BigInt {
        self.r.denom()
    }

    pub fn signum(&self) -> i32 {
        let s = |b: &BigInt| match b.sign() {
            num_bigint::Sign::Minus => -1,
            num_bigint::Sign::NoSign => 0,
            num_bigint::Sign::Plus => 1,
        };
        s(self.numerateur()) * s(self.denominateur())
    }

    pub fn is_zero(&self) -> bool {
        self.numerateur().is_zero()
    }

    /* ------------------------ Taille / réduction ------------------------ */

    fn taille_bits(&self) -> u64 {
        self.numerateur().bits() + self.denominateur().bits()
    }

    fn too_big(&self) -> bool {
        if self.denominateur().is_one() {
            return false;
        }
        self.taille_bits() > MAX_SIZE
    }

    /// Forme réduite, dénominateur positif.
    pub fn reduce(&self) -> Self {
        if self.denominateur().is_one() {
            return self.clone();
        }
        Self {
            r: self.r.reduced(),
        }
    }

    /// Post-traitement de chaque opération : on laisse la fraction brute la plupart
    /// du temps ; sinon réduction complète et contrôle du plafond.
    fn maybe_reduce(self) -> Option<Self> {
        if tirage() & 0xf != 0 && !self.too_big() {
            return Some(self);
        }
        let reduit = self.reduce();
        if reduit.too_big() {
            None
        } else {
            Some(reduit)
        }
    }

    /// Nombre approximatif de bits de la partie entière ; i32::MIN pour zéro.
    pub fn whole_number_bits(&self) -> i32 {
        if self.is_zero() {
            return i32::MIN;
        }
        self.numerateur().bits() as i32 - self.denominateur().bits() as i32
    }

    /* ------------------------ Arithmétique ------------------------ */

    pub fn add(&self, autre: &Self) -> Option<Self> {
        let (n1, d1) = (self.numerateur(), self.denominateur());
        let (n2, d2) = (autre.numerateur(), autre.denominateur());
        let brut = if d1 == d2 {
            Self::new(n1 + n2, d1.clone())
        } else {
            Self::new(n1 * d2 + n2 * d1, d1 * d2)
        };
        brut.maybe_reduce()
    }

    pub fn negate(&self) -> Self {
        Self::new(-self.numerateur(), self.denominateur().clone())
    }

    pub fn subtract(&self, autre: &Self) -> Option<Self> {
        self.add(&autre.negate())
    }

    fn raw_multiply(&self, autre: &Self) -> Self {
        // Cas fréquent : multiplication par 1.
        if self.numerateur() == self.denominateur() {
            return autre.clone();
        }
        if autre.numerateur() == autre.denominateur() {
            return self.clone();
        }
        Self::new(
            self.numerateur() * autre.numerateur(),
            self.denominateur() * autre.denominateur(),
        )
    }

    pub fn multiply(&self, autre: &Self) -> Option<Self> {
        self.raw_multiply(autre).maybe_reduce()
    }

    pub fn inverse(&self) -> Resultat<Self> {
        if self.is_zero() {
            return Err(CalcError::DivisionByZero);
        }
        Ok(Self::new(
            self.denominateur().clone(),
            self.numerateur().clone(),
        ))
    }

    pub fn divide(&self, autre: &Self) -> Resultat<Option<Self>> {
        Ok(self.multiply(&autre.inverse()?))
    }

    /// Racine exacte : seulement si numérateur ET dénominateur réduits sont des carrés.
    pub fn sqrt(&self) -> Resultat<Option<Self>> {
        let r = self.reduce();
        if r.signum() < 0 {
            return Err(CalcError::domain("racine d'un négatif"));
        }
        let racine_exacte = |n: &BigInt| -> Option<BigInt> {
            let s = n.sqrt();
            if &(&s * &s) == n {
                Some(s)
            } else {
                None
            }
        };
        let num = match racine_exacte(r.numerateur()) {
            Some(v) => v,
            None => return Ok(None),
        };
        let den = match racine_exacte(r.denominateur()) {
            Some(v) => v,
            None => return Ok(None),
        };
        Ok(Some(Self::new(num, den)))
    }

    /// Puissance entière par carrés successifs (itératif : profondeur constante).
    pub fn pow(&self, exp: &BigInt) -> Resultat<Option<Self>> {
        if exp.is_negative() {
            return match self.pow(&-exp)? {
                Some(p) => Ok(Some(p.inverse()?)),
                None => Ok(None),
            };
        }
        if exp.is_one() {
            return Ok(Some(self.clone()));
        }
        if exp.is_zero() {
            return Ok(Some(Self::one()));
        }
        // Une réduction au départ suffit : les puissances restent réduites.
        let base = self.reduce();
        if base.is_zero() || base.numerateur().abs() == base.denominateur().abs() {
            // 0, 1 et -1 : la taille ne bouge pas
            return Ok(Some(if base.is_zero() || !exp.bit(0) {
                base.raw_multiply(&base)
            } else {
                base
            }));
        }
        // Borne basse de la taille du résultat : (bits(num)-1 + bits(den)-1)·exp,
        // au moins exp puisque |num| ou |den| dépasse 1.
        let bits_min = base.taille_bits() - 2;
        match exp.to_u64().and_then(|e| e.checked_mul(bits_min)) {
            Some(taille) if taille <= MAX_SIZE => {}
            _ => return Ok(None),
        }
        let mut acc = Self::one();
        for bit in (0..exp.bits()).rev() {
            verifier_interruption()?;
            acc = acc.raw_multiply(&acc);
            if exp.bit(bit) {
                acc = acc.raw_multiply(&base);
            }
            // entiers compris : le plafond vaut aussi pour un dénominateur 1
            if acc.taille_bits() > MAX_SIZE {
                return Ok(None);
            }
        }
        Ok(Some(acc))
    }

    /// base^exp pour un exposant rationnel : seulement les exposants entiers.
    pub fn pow_rationnel(base: &Self, exp: &Self) -> Resultat<Option<Self>> {
        if exp.is_zero() {
            return Ok(Some(Self::one()));
        }
        match exp.as_big_integer() {
            Some(e) => base.pow(&e),
            None => Ok(None),
        }
    }

    /* ------------------------ Conversions ------------------------ */

    /// Valeur entière exacte, si la fraction en est une.
    pub fn as_big_integer(&self) -> Option<BigInt> {
        let (n, d) = (self.numerateur(), self.denominateur());
        if (n % d).is_zero() {
            Some(n / d)
        } else {
            None
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.reduce().r.to_f64()
    }

    /// Nombre de chiffres après la virgule pour un développement exact ;
    /// CHIFFRES_INFINIS si le dénominateur réduit a un facteur premier autre que 2 et 5.
    pub fn digits_required(&self) -> i32 {
        if self.denominateur().is_one() {
            return 0;
        }
        let r = self.reduce();
        let mut den = r.denominateur().abs();
        if den.bits() > MAX_SIZE {
            return CHIFFRES_INFINIS;
        }
        let mut deux = 0i32;
        let mut cinq = 0i32;
        let cinq_big = BigInt::from(5);
        while !den.bit(0) {
            deux += 1;
            den >>= 1;
        }
        while (&den % &cinq_big).is_zero() {
            cinq += 1;
            den /= &cinq_big;
        }
        if !den.is_one() {
            return CHIFFRES_INFINIS;
        }
        deux.max(cinq)
    }

    /// Développement décimal tronqué vers zéro à `n` chiffres après la virgule.
    pub fn to_string_truncated(&self, n: i32) -> String {
        let n = n.max(0) as usize;
        let echelle = BigInt::from(10).pow(n as u32);
        let scale = (self.numerateur().abs() * echelle) / self.denominateur().abs();
        chiffres_tronques(self.signum() < 0, &scale, n)
    }

    /// Forme lisible "n" ou "n/d", réduite.
    pub fn to_nice_string(&self) -> String {
        let r = self.reduce();
        if r.denominateur().is_one() {
            format!("{}", r.numerateur())
        } else {
            format!("{}/{}", r.numerateur(), r.denominateur())
        }
    }
}

impl From<i64> for BoundedRational {
    fn from(n: i64) -> Self {
        Self::from_integer(n)
    }
}

impl From<BigInt> for BoundedRational {
    fn from(n: BigInt) -> Self {
        Self::from_integer(n)
    }
}

/* ------------------------ Comparaison (sans division) ------------------------ */

impl Ord for BoundedRational {
    fn cmp(&self, autre: &Self) -> Ordering {
        let gauche = self.numerateur() * autre.denominateur();
        let droite = autre.numerateur() * self.denominateur();
        let signes = self.denominateur().is_negative() != autre.denominateur().is_negative();
        let c = gauche.cmp(&droite);
        if signes {
            c.reverse()
        } else {
            c
        }
    }
}

impl PartialOrd for BoundedRational {
    fn partial_cmp(&self, autre: &Self) -> Option<Ordering> {
        Some(self.cmp(autre))
    }
}

impl PartialEq for BoundedRational {
    fn eq(&self, autre: &Self) -> bool {
        self.cmp(autre) == Ordering::Equal
    }
}

impl Eq for BoundedRational {}

impl fmt::Display for BoundedRational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerateur(), self.denominateur())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn br(n: i64, d: i64) -> BoundedRational {
        BoundedRational::new(n, d)
    }

    #[test]
    fn reduction_idempotente() {
        let r = br(-84, -36);
        let a = r.reduce();
        let b = a.reduce();
        assert_eq!(a.numerateur(), b.numerateur());
        assert_eq!(a.denominateur(), b.denominateur());
        assert_eq!(a.numerateur(), &BigInt::from(7));
        assert_eq!(a.denominateur(), &BigInt::from(3));
    }

    #[test]
    fn comparaison_signes_denominateurs() {
        assert!(br(1, -2) < br(1, 3));
        assert!(br(-1, -2) > br(1, 3));
        assert_eq!(br(2, 4), br(-1, -2));
    }

    #[test]
    fn arithmetique_de_base() {
        let s = br(1, 2).add(&br(1, 3)).unwrap();
        assert_eq!(s, br(5, 6));
        let p = br(2, 3).multiply(&br(3, 4)).unwrap();
        assert_eq!(p, br(1, 2));
        let q = br(1, 2).divide(&br(1, 4)).unwrap().unwrap();
        assert_eq!(q, br(2, 1));
    }

    #[test]
    fn division_par_zero_distincte() {
        assert_eq!(br(0, 5).inverse().unwrap_err(), CalcError::DivisionByZero);
        assert_eq!(
            br(1, 1).divide(&br(0, 3)).unwrap_err(),
            CalcError::DivisionByZero
        );
    }

    #[test]
    fn racine_exacte_seulement() {
        assert_eq!(br(9, 4).sqrt().unwrap(), Some(br(3, 2)));
        assert_eq!(br(18, 8).sqrt().unwrap(), Some(br(3, 2)));
        assert_eq!(br(2, 1).sqrt().unwrap(), None);
        assert!(br(-4, 1).sqrt().is_err());
    }

    #[test]
    fn puissance_et_plafond() {
        let p = br(2, 3).pow(&BigInt::from(3)).unwrap().unwrap();
        assert_eq!(p, br(8, 27));
        let inv = br(2, 1).pow(&BigInt::from(-2)).unwrap().unwrap();
        assert_eq!(inv, br(1, 4));
        // 3^20000 / 2 dépasse largement le plafond
        let trop = br(3, 2).pow(&BigInt::from(20_000)).unwrap();
        assert!(trop.is_none());
    }

    #[test]
    fn puissance_entiere_plafonnee() {
        // un résultat entier reste soumis au plafond
        assert!(br(2, 1).pow(&BigInt::from(1u64 << 22)).unwrap().is_none());
        assert!(br(2, 1).pow(&BigInt::from(68_719_476_736u64)).unwrap().is_none());
        assert!(br(-3, 1).pow(&BigInt::from(10).pow(40)).unwrap().is_none());
        // juste sous le plafond : 2^9000 a 9001 bits
        let p = br(2, 1).pow(&BigInt::from(9000)).unwrap().unwrap();
        assert_eq!(p.numerateur().bits(), 9001);
        // 0, 1 et -1 pour n'importe quel exposant
        let enorme = BigInt::from(10).pow(100);
        assert_eq!(br(1, 1).pow(&enorme).unwrap(), Some(br(1, 1)));
        assert_eq!(br(0, 7).pow(&enorme).unwrap(), Some(br(0, 1)));
        assert_eq!(br(-1, 1).pow(&enorme).unwrap(), Some(br(1, 1)));
        assert_eq!(br(3, -3).pow(&(enorme + 1)).unwrap(), Some(br(-1, 1)));
    }

    #[test]
    fn chiffres_requis() {
        assert_eq!(br(1, 8).digits_required(), 3);
        assert_eq!(br(3, 40).digits_required(), 3);
        assert_eq!(br(7, 1).digits_required(), 0);
        assert_eq!(br(1, 3).digits_required(), CHIFFRES_INFINIS);
    }

    #[test]
    fn troncature_decimale() {
        assert_eq!(br(1, 3).to_string_truncated(5), "0.33333");
        assert_eq!(br(-2, 3).to_string_truncated(3), "-0.666");
        assert_eq!(br(1, 200).to_string_truncated(2), "0.00");
        assert_eq!(br(22, 7).to_string_truncated(0), "3.");
    }

    #[test]
    fn entier_exact() {
        assert_eq!(br(12, -4).as_big_integer(), Some(BigInt::from(-3)));
        assert_eq!(br(1, 2).as_big_integer(), None);
        assert_eq!(br(6, 4).to_nice_string(), "3/2");
    }
}
