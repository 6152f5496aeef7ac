// src/noyau/reel.rs
//
// UnifiedReal : rationnel × facteur réel
// --------------------------------------
// valeur = rat · facteur, où facteur est
//   - une constante nommée (1, π, e, √n, ln n) : faits exacts connus
//   - ou un réel constructif opaque : seulement des approximations
//
// - Chemin symbolique d'abord (même facteur -> arithmétique sur `rat`)
// - Repli numérique sinon (le facteur devient opaque, rat = 1)
// - Comparaisons : exactes si décidables, sinon à tolérance ; compare_to peut
//   ne pas terminer quand les deux valeurs sont égales sans être comparables
//
// Trigonométrie : voir trig.rs ; ln / exp / pow / fact : voir fonctions.rs.

use num_bigint::BigInt;
use num_traits::{One, Signed};

use super::constantes::{ConstanteNommee, PETITS_ENTIERS};
use super::erreurs::{CalcError, Resultat};
use super::lecture::chiffres_tronques;
use super::rationnel::{BoundedRational, CHIFFRES_INFINIS};
use super::reel_constructif::Cr;

/// Tolérance (log2) des comparaisons "presque sûres".
pub const TOLERANCE_COMPARAISON: i32 = -1000;

/// Bits supplémentaires pour tronquer une valeur dont on ne sait pas si elle est exacte.
const EXTRA_PREC: i32 = 10;

#[derive(Clone, Debug)]
pub enum Facteur {
    Nomme(ConstanteNommee),
    Opaque(Cr),
}

impl Facteur {
    /// Même facteur : même nom, ou même nœud opaque.
    pub fn meme(&self, autre: &Facteur) -> bool {
        match (self, autre) {
            (Facteur::Nomme(a), Facteur::Nomme(b)) => a == b,
            (Facteur::Opaque(a), Facteur::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn nomme(&self) -> Option<ConstanteNommee> {
        match self {
            Facteur::Nomme(c) => Some(*c),
            Facteur::Opaque(_) => None,
        }
    }

    pub fn est_un(&self) -> bool {
        matches!(self, Facteur::Nomme(ConstanteNommee::Un))
    }

    pub fn cr(&self) -> Cr {
        match self {
            Facteur::Nomme(c) => c.cr(),
            Facteur::Opaque(cr) => cr.clone(),
        }
    }

    fn carre(&self) -> Option<BoundedRational> {
        self.nomme()
            .and_then(ConstanteNommee::carre)
            .map(|n| BoundedRational::from(n as i64))
    }

    fn independants(&self, autre: &Facteur) -> bool {
        match (self.nomme(), autre.nomme()) {
            (Some(a), Some(b)) => ConstanteNommee::independantes(a, b),
            _ => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UnifiedReal {
    pub(crate) rat: BoundedRational,
    pub(crate) facteur: Facteur,
}

/* ------------------------ Construction ------------------------ */

impl UnifiedReal {
    pub fn new(rat: BoundedRational, facteur: Facteur) -> Self {
        Self { rat, facteur }
    }

    pub fn nomme(rat: BoundedRational, c: ConstanteNommee) -> Self {
        Self::new(rat, Facteur::Nomme(c))
    }

    pub fn rationnel(rat: BoundedRational) -> Self {
        Self::nomme(rat, ConstanteNommee::Un)
    }

    pub fn fraction(num: i64, den: i64) -> Self {
        Self::rationnel(BoundedRational::new(num, den))
    }

    pub fn opaque(cr: Cr) -> Self {
        Self::new(BoundedRational::one(), Facteur::Opaque(cr))
    }

    pub fn zero() -> Self {
        Self::rationnel(BoundedRational::zero())
    }

    pub fn one() -> Self {
        Self::rationnel(BoundedRational::one())
    }

    pub fn pi() -> Self {
        Self::nomme(BoundedRational::one(), ConstanteNommee::Pi)
    }

    pub fn e() -> Self {
        Self::nomme(BoundedRational::one(), ConstanteNommee::E)
    }

    /// π/180
    pub fn radians_par_degre() -> Self {
        Self::nomme(BoundedRational::new(1, 180), ConstanteNommee::Pi)
    }

    pub fn rat(&self) -> &BoundedRational {
        &self.rat
    }

    pub fn facteur(&self) -> &Facteur {
        &self.facteur
    }

    /// Valeur numérique complète rat · facteur.
    pub fn cr_value(&self) -> Cr {
        let f = self.facteur.cr();
        if self.rat.numerateur() == self.rat.denominateur() {
            return f;
        }
        let r = Cr::fraction(self.rat.numerateur(), self.rat.denominateur());
        if self.facteur.est_un() {
            r
        } else {
            r.multiply(&f)
        }
    }

    pub fn to_f64(&self) -> Resultat<f64> {
        if self.facteur.est_un() {
            if let Some(v) = self.rat.to_f64() {
                return Ok(v);
            }
        }
        self.cr_value().to_f64()
    }
}

impl From<i64> for UnifiedReal {
    fn from(n: i64) -> Self {
        Self::rationnel(BoundedRational::from(n))
    }
}

impl From<BigInt> for UnifiedReal {
    fn from(n: BigInt) -> Self {
        Self::rationnel(BoundedRational::from(n))
    }
}

impl From<BoundedRational> for UnifiedReal {
    fn from(r: BoundedRational) -> Self {
        Self::rationnel(r)
    }
}

/* ------------------------ Propriétés certaines ------------------------ */

impl UnifiedReal {
    pub fn definitely_zero(&self) -> bool {
        self.rat.is_zero()
    }

    pub fn definitely_non_zero(&self) -> bool {
        self.facteur.nomme().is_some() && !self.rat.is_zero()
    }

    pub fn definitely_one(&self) -> bool {
        self.facteur.est_un() && self.rat == BoundedRational::one()
    }

    pub fn definitely_rational(&self) -> bool {
        self.facteur.est_un() || self.rat.is_zero()
    }

    pub fn definitely_irrational(&self) -> bool {
        !self.definitely_rational() && self.facteur.nomme().is_some()
    }

    pub fn definitely_algebraic(&self) -> bool {
        self.facteur.nomme().is_some_and(ConstanteNommee::algebrique) || self.rat.is_zero()
    }

    pub fn definitely_transcendental(&self) -> bool {
        !self.definitely_algebraic() && self.facteur.nomme().is_some()
    }

    /// Valeur rationnelle exacte, si connue.
    pub fn bounded_rational_value(&self) -> Option<BoundedRational> {
        self.definitely_rational().then(|| self.rat.clone())
    }

    pub fn big_integer_value(&self) -> Option<BigInt> {
        self.bounded_rational_value()?.as_big_integer()
    }

    /* ------------------------ Comparaisons ------------------------ */

    /// La comparaison exacte avec `u` termine certainement.
    pub fn is_comparable(&self, u: &UnifiedReal) -> Resultat<bool> {
        if self.facteur.meme(&u.facteur) {
            match &self.facteur {
                Facteur::Nomme(_) => return Ok(true),
                Facteur::Opaque(cr) => {
                    if cr.signum_a(TOLERANCE_COMPARAISON)? != 0 {
                        return Ok(true);
                    }
                }
            }
        }
        if self.rat.is_zero() && u.rat.is_zero() {
            return Ok(true);
        }
        if self.facteur.independants(&u.facteur) {
            return Ok(true);
        }
        Ok(self
            .cr_value()
            .compare_to_abs(&u.cr_value(), TOLERANCE_COMPARAISON)?
            != 0)
    }

    /// Comparaison exacte ; peut ne pas terminer si les valeurs sont égales
    /// sans être comparables.
    pub fn compare_to(&self, u: &UnifiedReal) -> Resultat<i32> {
        if self.definitely_zero() && u.definitely_zero() {
            return Ok(0);
        }
        if self.facteur.meme(&u.facteur) {
            let signe = match &self.facteur {
                // toutes les constantes nommées sont > 0
                Facteur::Nomme(_) => 1,
                Facteur::Opaque(cr) => cr.signum()?,
            };
            let c = match self.rat.cmp(&u.rat) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            };
            return Ok(signe * c);
        }
        self.cr_value().compare_to(&u.cr_value())
    }

    /// Comparaison : exacte si décidable, sinon à tolérance 2^a (0 = "proches").
    pub fn compare_to_a(&self, u: &UnifiedReal, a: i32) -> Resultat<i32> {
        if self.is_comparable(u)? {
            self.compare_to(u)
        } else {
            self.cr_value().compare_to_abs(&u.cr_value(), a)
        }
    }

    pub fn signum_a(&self, a: i32) -> Resultat<i32> {
        if self.facteur.nomme().is_some() {
            return Ok(self.rat.signum());
        }
        self.compare_to_a(&Self::zero(), a)
    }

    pub fn signum(&self) -> Resultat<i32> {
        if self.facteur.nomme().is_some() {
            return Ok(self.rat.signum());
        }
        self.compare_to(&Self::zero())
    }

    /// Égalité probable (tolérance 2^a) ; exacte quand décidable.
    pub fn approx_equals(&self, u: &UnifiedReal, a: i32) -> Resultat<bool> {
        if self.is_comparable(u)? {
            if self.facteur.independants(&u.facteur) && (!self.rat.is_zero() || !u.rat.is_zero())
            {
                return Ok(false);
            }
            return Ok(self.compare_to(u)? == 0);
        }
        Ok(self.cr_value().compare_to_abs(&u.cr_value(), a)? == 0)
    }

    /// Égalité certaine (false = égalité possible ou inconnue).
    pub fn definitely_equals(&self, u: &UnifiedReal) -> Resultat<bool> {
        Ok(self.is_comparable(u)? && self.compare_to(u)? == 0)
    }

    /// Inégalité certaine, sans approximation.
    pub fn definitely_not_equals(&self, u: &UnifiedReal) -> bool {
        let nomme = self.facteur.nomme().is_some();
        let u_nomme = u.facteur.nomme().is_some();
        if nomme && u_nomme {
            if self.facteur.independants(&u.facteur) {
                return !self.rat.is_zero() || !u.rat.is_zero();
            }
            return self.rat != u.rat;
        }
        if self.rat.is_zero() {
            return u_nomme && !u.rat.is_zero();
        }
        if u.rat.is_zero() {
            return nomme && !self.rat.is_zero();
        }
        false
    }

    /* ------------------------ Arithmétique ------------------------ */

    pub fn add(&self, u: &UnifiedReal) -> UnifiedReal {
        if self.facteur.meme(&u.facteur) {
            if let Some(r) = self.rat.add(&u.rat) {
                return Self::new(r, self.facteur.clone());
            }
        }
        if self.definitely_zero() {
            return u.clone();
        }
        if u.definitely_zero() {
            return self.clone();
        }
        Self::opaque(self.cr_value().add(&u.cr_value()))
    }

    pub fn negate(&self) -> UnifiedReal {
        Self::new(self.rat.negate(), self.facteur.clone())
    }

    pub fn subtract(&self, u: &UnifiedReal) -> UnifiedReal {
        self.add(&u.negate())
    }

    pub fn multiply(&self, u: &UnifiedReal) -> UnifiedReal {
        if self.facteur.est_un() {
            if let Some(r) = self.rat.multiply(&u.rat) {
                return Self::new(r, u.facteur.clone());
            }
        }
        if u.facteur.est_un() {
            if let Some(r) = self.rat.multiply(&u.rat) {
                return Self::new(r, self.facteur.clone());
            }
        }
        if self.definitely_zero() || u.definitely_zero() {
            return Self::zero();
        }
        if self.facteur.meme(&u.facteur) {
            // √n · √n = n
            if let Some(carre) = self.facteur.carre() {
                let r = carre
                    .multiply(&self.rat)
                    .and_then(|p| p.multiply(&u.rat));
                if let Some(r) = r {
                    return Self::rationnel(r);
                }
            }
        }
        if let Some(r) = self.rat.multiply(&u.rat) {
            return Self::new(r, Facteur::Opaque(self.facteur.cr().multiply(&u.facteur.cr())));
        }
        Self::opaque(self.cr_value().multiply(&u.cr_value()))
    }

    pub fn inverse(&self) -> Resultat<UnifiedReal> {
        if self.definitely_zero() {
            return Err(CalcError::DivisionByZero);
        }
        // 1/(r·√n) = (1/(r·n))·√n
        if let Some(carre) = self.facteur.carre() {
            if let Some(p) = self.rat.multiply(&carre) {
                return Ok(Self::new(p.inverse()?, self.facteur.clone()));
            }
        }
        Ok(Self::new(
            self.rat.inverse()?,
            Facteur::Opaque(self.facteur.cr().inverse()),
        ))
    }

    pub fn divide(&self, u: &UnifiedReal) -> Resultat<UnifiedReal> {
        if self.facteur.meme(&u.facteur) {
            if u.definitely_zero() {
                return Err(CalcError::DivisionByZero);
            }
            if let Some(r) = self.rat.divide(&u.rat)? {
                return Ok(Self::rationnel(r));
            }
        }
        Ok(self.multiply(&u.inverse()?))
    }

    pub fn sqrt(&self) -> Resultat<UnifiedReal> {
        if self.facteur.nomme().is_some() && self.rat.signum() < 0 {
            return Err(CalcError::domain("racine d'un négatif"));
        }
        if self.facteur.est_un() {
            for diviseur in std::iter::once(1u8).chain(PETITS_ENTIERS) {
                let quotient = self.rat.divide(&BoundedRational::from(diviseur as i64))?;
                if let Some(racine) = quotient.map(|q| q.sqrt()).transpose()?.flatten() {
                    if let Some(c) = ConstanteNommee::racine(diviseur) {
                        return Ok(Self::nomme(racine, c));
                    }
                }
            }
        }
        Ok(Self::opaque(self.cr_value().sqrt()))
    }

    /* ------------------------ Rendu décimal ------------------------ */

    /// La troncature de cr_value() est sûre : la valeur n'est pas un
    /// décimal exact déguisé.
    pub fn exactly_truncatable(&self) -> bool {
        self.facteur.est_un() || self.rat.is_zero() || self.definitely_irrational()
    }

    /// Troncature vers zéro à `n` chiffres après la virgule.
    ///
    /// Pour une valeur qui n'est pas "exactement tronquable", le dernier chiffre
    /// peut être trop petit d'une unité ; l'appelant le sait (voir le moteur).
    pub fn to_string_truncated(&self, n: i32) -> Resultat<String> {
        if self.facteur.est_un() || self.rat.is_zero() {
            return Ok(self.rat.to_string_truncated(n));
        }
        let n = n.max(0);
        let puissance = Cr::entier(BigInt::from(10).pow(n as u32));
        let scaled = puissance.multiply(&self.cr_value());
        let mut negatif = false;
        let entier = if self.exactly_truncatable() {
            let mut a = scaled.get_appr(0)?;
            if a.is_negative() {
                negatif = true;
                a = -a;
            }
            if Cr::entier(a.clone()).compare_to(&scaled.abs())? > 0 {
                a -= BigInt::one();
            }
            a
        } else {
            let mut a = scaled.get_appr(-EXTRA_PREC)?;
            if a.is_negative() {
                negatif = true;
                a = -a;
            }
            a >> (EXTRA_PREC as usize)
        };
        Ok(chiffres_tronques(negatif, &entier, n as usize))
    }

    /// Nombre de chiffres après la virgule d'un développement exact, ou
    /// CHIFFRES_INFINIS.
    pub fn digits_required(&self) -> i32 {
        if self.facteur.est_un() || self.rat.is_zero() {
            self.rat.digits_required()
        } else {
            CHIFFRES_INFINIS
        }
    }

    /// Minorant du nombre de zéros binaires après la virgule ; i32::MAX si inconnu.
    pub fn leading_binary_zeroes(&self) -> i32 {
        if self.facteur.nomme().is_none() {
            return i32::MAX;
        }
        let bits = self.rat.whole_number_bits();
        if bits == i32::MIN {
            i32::MAX
        } else if bits >= 3 {
            0
        } else {
            -bits + 3
        }
    }

    /// La partie entière a (à peu près) plus de `borne` bits.
    pub fn approx_whole_number_bits_greater_than(&self, borne: i32) -> Resultat<bool> {
        if self.facteur.nomme().is_some() {
            return Ok(self.rat.whole_number_bits() > borne);
        }
        let a = self.cr_value().get_appr(borne - 2)?;
        Ok(a.magnitude().bits() > 2)
    }

    /// Forme symbolique exacte ("3/2π", "√2"), si la valeur en a une.
    pub fn exactly_displayable(&self) -> bool {
        self.facteur.nomme().is_some()
    }

    /// Forme lisible : symbolique si possible, sinon décimale approchée.
    pub fn to_nice_string(&self) -> Resultat<String> {
        if self.definitely_rational() {
            return Ok(self.rat.to_nice_string());
        }
        match self.facteur.nomme() {
            Some(c) => {
                let nom = c.nom();
                match self.rat.reduce().as_big_integer() {
                    Some(b) if b.is_one() => Ok(nom),
                    Some(b) if b == BigInt::from(-1) => Ok(format!("-{nom}")),
                    Some(_) => Ok(format!("{}{nom}", self.rat.to_nice_string())),
                    None => Ok(format!("({}){nom}", self.rat.to_nice_string())),
                }
            }
            None => self.to_string_truncated(10),
        }
    }
}

impl std::fmt::Display for UnifiedReal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.facteur.nomme() {
            Some(c) => write!(f, "{}*{}", self.rat.to_nice_string(), c.nom()),
            None => write!(f, "{}*{:?}", self.rat.to_nice_string(), self.facteur.cr()),
        }
    }
}
