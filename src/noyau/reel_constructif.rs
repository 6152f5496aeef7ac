// src/noyau/reel_constructif.rs
//
// Réels constructifs (évaluation paresseuse à précision arbitraire)
// ----------------------------------------------------------------
// Un réel x est représenté par une fonction p -> a (BigInt) telle que
//     |a·2^p - x| < 2^p
// On ne calcule jamais "la" valeur : on demande une approximation à 2^p près,
// et le nœud garde en cache la meilleure approximation déjà obtenue.
//
// - Opérations : +, ×, inverse, puissance entière, décalage, √, exp, ln, cos/sin, atan/asin/acos
// - Interruption coopérative : drapeau par fil, vérifié à chaque approximation
// - Précision bornée : au-delà de ~2^28 bits -> PrecisionOverflow
// - Comparaison exacte possible seulement si les valeurs diffèrent (sinon : ne
//   termine pas, sauf tolérance explicite)

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::erreurs::{CalcError, Resultat};

/* ------------------------ Interruption coopérative ------------------------ */

thread_local! {
    static DRAPEAU_ARRET: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// Installe le drapeau d'arrêt du fil courant jusqu'à la fin de la garde.
pub fn installer_interruption(drapeau: Arc<AtomicBool>) -> GardeInterruption {
    let precedent = DRAPEAU_ARRET.with(|d| d.borrow_mut().replace(drapeau));
    GardeInterruption { precedent }
}

pub struct GardeInterruption {
    precedent: Option<Arc<AtomicBool>>,
}

impl Drop for GardeInterruption {
    fn drop(&mut self) {
        let precedent = self.precedent.take();
        DRAPEAU_ARRET.with(|d| *d.borrow_mut() = precedent);
    }
}

/// Aborted si la tâche du fil courant a été annulée.
pub fn verifier_interruption() -> Resultat<()> {
    let arret = DRAPEAU_ARRET.with(|d| {
        d.borrow()
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    });
    if arret {
        Err(CalcError::Aborted)
    } else {
        Ok(())
    }
}

/* ------------------------ Outils entiers ------------------------ */

/// Précision utilisable : |n| < 2^28 environ.
fn verifier_precision(n: i32) -> Resultat<()> {
    let haut = n >> 28;
    let haut_decale = n >> 29;
    if haut ^ haut_decale != 0 {
        Err(CalcError::PrecisionOverflow)
    } else {
        Ok(())
    }
}

fn shift(k: &BigInt, n: i32) -> BigInt {
    match n {
        0 => k.clone(),
        n if n < 0 => k >> (-n as usize),
        n => k << (n as usize),
    }
}

/// k·2^n, arrondi au plus proche si n < 0.
fn scale(k: &BigInt, n: i32) -> BigInt {
    if n >= 0 {
        k << (n as usize)
    } else {
        let ajuste = shift(k, n + 1) + 1;
        ajuste >> 1usize
    }
}

/// ⌈log2(|n| + 1)⌉
fn bound_log2(n: i32) -> i32 {
    let abs_n = (n as i64).abs() as f64;
    ((abs_n + 1.0).ln() / 2f64.ln()).ceil() as i32
}

/// Division entière arrondie au plus proche (den > 0).
fn div_arrondie(num: &BigInt, den: &BigInt) -> BigInt {
    let deux_num = (num << 1usize) + den;
    let deux_den: BigInt = den << 1usize;
    let q = &deux_num / &deux_den;
    if deux_num.is_negative() && !(&deux_num % &deux_den).is_zero() {
        q - 1
    } else {
        q
    }
}

fn nb_bits(a: &BigInt) -> i32 {
    a.magnitude().bits() as i32
}

/* ------------------------ Nœuds ------------------------ */

enum Op {
    Entier(BigInt),
    /// num / den, den > 0
    Fraction(BigInt, BigInt),
    Decale(Cr, i32),
    Neg(Cr),
    Abs(Cr),
    Somme(Cr, Cr),
    Produit(Cr, Cr),
    Inverse(Cr),
    /// x^n, n >= 2
    Puissance(Cr, BigInt),
    Racine(Cr),
    /// exp(x) pour |x| < 1/2
    ExpPrescale(Cr),
    /// cos(x) pour |x| < 1
    CosPrescale(Cr),
    /// ln(1 + x) pour |x| < 1/2
    LnPrescale(Cr),
    /// atan(x) pour |x| < 1/2
    AtanPrescale(Cr),
    /// atan(1/n)
    AtanInverseEntier(i32),
}

struct Noeud {
    op: Op,
    /// (précision, approximation) la plus fine calculée
    cache: Mutex<Option<(i32, BigInt)>>,
}

/// Réel constructif partagé (clone = même nœud, même cache).
#[derive(Clone)]
pub struct Cr(Arc<Noeud>);

impl std::fmt::Debug for Cr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.0.cache.lock().unwrap_or_else(PoisonError::into_inner);
        match cache.as_ref() {
            Some((p, a)) => write!(f, "Cr({a}·2^{p})"),
            None => write!(f, "Cr(?)"),
        }
    }
}

impl Cr {
    fn nouveau(op: Op) -> Self {
        Cr(Arc::new(Noeud {
            op,
            cache: Mutex::new(None),
        }))
    }

    /// Même nœud (identité, pas égalité numérique).
    pub fn ptr_eq(&self, autre: &Cr) -> bool {
        Arc::ptr_eq(&self.0, &autre.0)
    }

    pub fn entier(n: impl Into<BigInt>) -> Self {
        Self::nouveau(Op::Entier(n.into()))
    }

    /// num / den exact. Le dénominateur doit être non nul.
    pub fn fraction(num: &BigInt, den: &BigInt) -> Self {
        if den.is_one() {
            return Self::entier(num.clone());
        }
        if den.is_negative() {
            Self::nouveau(Op::Fraction(-num, -den))
        } else {
            Self::nouveau(Op::Fraction(num.clone(), den.clone()))
        }
    }

    pub fn un() -> Self {
        Self::entier(1)
    }

    /* ------------------------ Constructions (sans sonder) ------------------------ */

    pub fn add(&self, autre: &Cr) -> Cr {
        Self::nouveau(Op::Somme(self.clone(), autre.clone()))
    }

    pub fn negate(&self) -> Cr {
        Self::nouveau(Op::Neg(self.clone()))
    }

    pub fn subtract(&self, autre: &Cr) -> Cr {
        self.add(&autre.negate())
    }

    pub fn multiply(&self, autre: &Cr) -> Cr {
        Self::nouveau(Op::Produit(self.clone(), autre.clone()))
    }

    /// 1/x. Ne termine pas (ou PrecisionOverflow) si x = 0.
    pub fn inverse(&self) -> Cr {
        Self::nouveau(Op::Inverse(self.clone()))
    }

    pub fn divide(&self, autre: &Cr) -> Cr {
        self.multiply(&autre.inverse())
    }

    /// x^n en un seul nœud, quelle que soit la taille de n.
    pub fn pow_entier(&self, n: &BigInt) -> Cr {
        if n.is_negative() {
            return self.pow_entier(&-n).inverse();
        }
        if n.is_zero() {
            return Cr::un();
        }
        if n.is_one() {
            return self.clone();
        }
        Self::nouveau(Op::Puissance(self.clone(), n.clone()))
    }

    pub fn shift_left(&self, n: i32) -> Cr {
        Self::nouveau(Op::Decale(self.clone(), n))
    }

    pub fn shift_right(&self, n: i32) -> Cr {
        Self::nouveau(Op::Decale(self.clone(), -n))
    }

    pub fn abs(&self) -> Cr {
        Self::nouveau(Op::Abs(self.clone()))
    }

    /// √x ; Domain à l'approximation si x < 0.
    pub fn sqrt(&self) -> Cr {
        Self::nouveau(Op::Racine(self.clone()))
    }

    /// ln(1 + x) pour |x| < 1/2.
    fn ln_1_plus(x: Cr) -> Cr {
        Self::nouveau(Op::LnPrescale(x))
    }

    /* ------------------------ Approximation + cache ------------------------ */

    /// Approximation a telle que |a·2^p - x| < 2^p.
    pub fn get_appr(&self, p: i32) -> Resultat<BigInt> {
        verifier_precision(p)?;
        verifier_interruption()?;
        {
            let cache = self.0.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((min_p, a)) = cache.as_ref() {
                if p >= *min_p {
                    return Ok(scale(a, min_p - p));
                }
            }
        }
        let a = self.approximer(p)?;
        let mut cache = self.0.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let plus_fin = cache.as_ref().is_none_or(|(min_p, _)| p < *min_p);
        if plus_fin {
            *cache = Some((p, a.clone()));
        }
        Ok(a)
    }

    /// Position du bit de tête, si |x| > 2^n environ ; None si x est trop petit
    /// pour être localisé à cette précision.
    pub fn msd(&self, n: i32) -> Resultat<Option<i32>> {
        {
            let cache = self.0.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((min_p, a)) = cache.as_ref() {
                if a.magnitude().bits() > 1 {
                    return Ok(Some(min_p + nb_bits(a) - 1));
                }
            }
        }
        verifier_precision(n)?;
        let a = self.get_appr(n - 1)?;
        if a.magnitude().bits() <= 1 {
            return Ok(None);
        }
        Ok(Some(n - 1 + nb_bits(&a) - 1))
    }

    /// Recherche du MSD à précision croissante, jusqu'à n.
    fn iter_msd(&self, n: i32) -> Resultat<Option<i32>> {
        let mut prec: i32 = 0;
        while prec > n.saturating_add(30) {
            if let Some(m) = self.msd(prec)? {
                return Ok(Some(m));
            }
            verifier_precision(prec)?;
            verifier_interruption()?;
            prec = (prec * 3) / 2 - 16;
        }
        self.msd(n)
    }

    /// MSD sans borne : ne termine pas pour zéro (PrecisionOverflow en pratique).
    fn msd_certain(&self) -> Resultat<i32> {
        match self.iter_msd(i32::MIN)? {
            Some(m) => Ok(m),
            None => Err(CalcError::PrecisionOverflow),
        }
    }

    /* ------------------------ Signe / comparaison ------------------------ */

    /// Signe, en considérant nul tout |x| < 2^a.
    pub fn signum_a(&self, a: i32) -> Resultat<i32> {
        {
            let cache = self.0.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((_, appr)) = cache.as_ref() {
                if !appr.is_zero() {
                    return Ok(if appr.is_negative() { -1 } else { 1 });
                }
            }
        }
        let appr = self.get_appr(a - 1)?;
        Ok(if appr.is_zero() {
            0
        } else if appr.is_negative() {
            -1
        } else {
            1
        })
    }

    /// Signe exact ; ne termine pas pour zéro.
    pub fn signum(&self) -> Resultat<i32> {
        let mut a: i32 = -20;
        loop {
            verifier_precision(a)?;
            let s = self.signum_a(a)?;
            if s != 0 {
                return Ok(s);
            }
            a = a.saturating_mul(2);
        }
    }

    /// Comparaison à tolérance absolue 2^a : 0 si les deux sont proches.
    pub fn compare_to_abs(&self, autre: &Cr, a: i32) -> Resultat<i32> {
        let prec = a - 1;
        let ceci = self.get_appr(prec)?;
        let cela = autre.get_appr(prec)?;
        if ceci > &cela + 1 {
            Ok(1)
        } else if ceci < &cela - 1 {
            Ok(-1)
        } else {
            Ok(0)
        }
    }

    /// Comparaison à tolérance relative 2^r (et absolue 2^a).
    pub fn compare_to_rel(&self, autre: &Cr, r: i32, a: i32) -> Resultat<i32> {
        let msd_ceci = self.iter_msd(a)?;
        let borne = match msd_ceci {
            Some(m) if m > a => m,
            _ => a,
        };
        let msd_cela = autre.iter_msd(borne)?;
        let max_msd = match (msd_ceci, msd_cela) {
            (None, None) => return Ok(0),
            (Some(x), None) | (None, Some(x)) => x,
            (Some(x), Some(y)) => x.max(y),
        };
        verifier_precision(r)?;
        let rel = max_msd + r;
        self.compare_to_abs(autre, rel.max(a))
    }

    /// Comparaison exacte ; ne termine pas si les valeurs sont égales.
    pub fn compare_to(&self, autre: &Cr) -> Resultat<i32> {
        let mut a: i32 = -20;
        loop {
            verifier_precision(a)?;
            let c = self.compare_to_abs(autre, a)?;
            if c != 0 {
                return Ok(c);
            }
            a = a.saturating_mul(2);
        }
    }

    /// Approximation flottante (affichage / contrôles grossiers).
    pub fn to_f64(&self) -> Resultat<f64> {
        let a = self.get_appr(-60)?;
        Ok(a.to_f64().unwrap_or(f64::NAN) * 2f64.powi(-60))
    }

    /* ------------------------ Fonctions (sondent l'argument) ------------------------ */

    pub fn exp(&self) -> Resultat<Cr> {
        let grossier = self.get_appr(-10)?;
        if grossier.abs() > BigInt::from(2) {
            let demi = self.shift_right(1).exp()?;
            Ok(demi.multiply(&demi))
        } else {
            Ok(Self::nouveau(Op::ExpPrescale(self.clone())))
        }
    }

    pub fn cos(&self) -> Resultat<Cr> {
        let demi_pi_multiples = self.divide(&pi()).get_appr(-1)?;
        if demi_pi_multiples.abs() >= BigInt::from(2) {
            // réduction par k·π
            let pi_multiples = scale(&demi_pi_multiples, -1);
            let ajustement = pi().multiply(&Cr::entier(pi_multiples.clone()));
            let reduit = self.subtract(&ajustement).cos()?;
            if pi_multiples.bit(0) {
                Ok(reduit.negate())
            } else {
                Ok(reduit)
            }
        } else if self.get_appr(-1)?.abs() >= BigInt::from(2) {
            // angle double
            let c = self.shift_right(1).cos()?;
            Ok(c.multiply(&c).shift_left(1).subtract(&Cr::un()))
        } else {
            Ok(Self::nouveau(Op::CosPrescale(self.clone())))
        }
    }

    pub fn sin(&self) -> Resultat<Cr> {
        demi_pi().subtract(self).cos()
    }

    pub fn ln(&self) -> Resultat<Cr> {
        // seizièmes
        let grossier = self.get_appr(-4)?;
        if grossier.is_negative() {
            return Err(CalcError::domain("ln d'un négatif"));
        }
        if grossier <= BigInt::from(8) {
            return Ok(self.inverse().ln()?.negate());
        }
        if grossier >= BigInt::from(24) {
            if grossier <= BigInt::from(64) {
                let quart = self.sqrt().sqrt().ln()?;
                return Ok(quart.shift_left(2));
            }
            let bits_en_trop = nb_bits(&grossier) - 3;
            let reduit = self.shift_right(bits_en_trop).ln()?;
            return Ok(reduit.add(&Cr::entier(bits_en_trop).multiply(&ln2())));
        }
        Ok(Self::ln_1_plus(self.subtract(&Cr::un())))
    }

    pub fn atan(&self) -> Resultat<Cr> {
        let grossier = self.get_appr(-4)?;
        if grossier.abs() >= BigInt::from(6) {
            // atan(x) = 2·atan(x / (1 + √(1 + x²)))
            let un = Cr::un();
            let denom = un.add(&un.add(&self.multiply(self)).sqrt());
            let reduit = self.divide(&denom);
            Ok(reduit.atan()?.shift_left(1))
        } else {
            Ok(Self::nouveau(Op::AtanPrescale(self.clone())))
        }
    }

    /// asin(x) = 2·atan(x / (1 + √(1 - x²))), |x| <= 1
    pub fn asin(&self) -> Resultat<Cr> {
        let un = Cr::un();
        let denom = un.add(&un.subtract(&self.multiply(self)).sqrt());
        Ok(self.divide(&denom).atan()?.shift_left(1))
    }

    pub fn acos(&self) -> Resultat<Cr> {
        Ok(demi_pi().subtract(&self.asin()?))
    }

    /* ------------------------ Approximations par nœud ------------------------ */

    fn approximer(&self, p: i32) -> Resultat<BigInt> {
        match &self.0.op {
            Op::Entier(n) => Ok(scale(n, -p)),
            Op::Fraction(num, den) => {
                if p <= 0 {
                    Ok(div_arrondie(&(num << ((-p) as usize)), den))
                } else {
                    Ok(div_arrondie(num, &(den << (p as usize))))
                }
            }
            Op::Decale(x, n) => x.get_appr(p - n),
            Op::Neg(x) => Ok(-x.get_appr(p)?),
            Op::Abs(x) => Ok(x.get_appr(p)?.abs()),
            Op::Somme(x, y) => {
                let s = x.get_appr(p - 2)? + y.get_appr(p - 2)?;
                Ok(scale(&s, -2))
            }
            Op::Produit(x, y) => approx_produit(x, y, p),
            Op::Inverse(x) => approx_inverse(x, p),
            Op::Puissance(x, n) => approx_puissance(x, n, p),
            Op::Racine(x) => self.approx_racine(x, p),
            Op::ExpPrescale(x) => approx_exp(x, p),
            Op::CosPrescale(x) => approx_cos(x, p),
            Op::LnPrescale(x) => approx_ln(x, p),
            Op::AtanPrescale(x) => approx_atan(x, p),
            Op::AtanInverseEntier(n) => approx_atan_inverse(*n, p),
        }
    }

    fn approx_racine(&self, x: &Cr, p: i32) -> Resultat<BigInt> {
        const FP_PREC: i32 = 50;
        const FP_OP_PREC: i32 = 60;
        let max_prec_needed = 2 * p - 1;
        let msd = match x.msd(max_prec_needed)? {
            Some(m) if m > max_prec_needed => m,
            _ => return Ok(BigInt::zero()),
        };
        let result_msd = msd / 2;
        let result_digits = result_msd - p;
        if result_digits > FP_PREC {
            // Newton à partir d'une approximation moins fine de soi-même.
            let appr_digits = result_digits / 2 + 6;
            let appr_prec = result_msd - appr_digits;
            let last_appr = self.get_appr(appr_prec)?;
            if last_appr.is_zero() {
                return Err(CalcError::domain("racine d'un négatif"));
            }
            let prod_prec = 2 * appr_prec;
            let op_appr = x.get_appr(prod_prec)?;
            let numerateur = &last_appr * &last_appr + op_appr;
            let numerateur = scale(&numerateur, appr_prec - p);
            let decale = numerateur / last_appr;
            Ok((decale + 1) >> 1usize)
        } else {
            // Flottant double précision sur une approximation entière.
            let op_prec = (msd - FP_OP_PREC) & !1;
            let working_prec = op_prec - FP_OP_PREC;
            let scaled_bi = x.get_appr(op_prec)? << (FP_OP_PREC as usize);
            let scaled = scaled_bi.to_f64().unwrap_or(f64::INFINITY);
            if scaled < 0.0 {
                return Err(CalcError::domain("racine d'un négatif"));
            }
            let racine = BigInt::from(scaled.sqrt() as i64);
            Ok(shift(&racine, working_prec / 2 - p))
        }
    }
}

fn approx_produit(x: &Cr, y: &Cr, p: i32) -> Resultat<BigInt> {
    let demi_prec = (p >> 1) - 1;
    let (gros, autre, msd_gros) = match x.msd(demi_prec)? {
        Some(m) => (x, y, m),
        None => match y.msd(demi_prec)? {
            // les deux facteurs sont assez petits pour que le produit soit ~0
            None => return Ok(BigInt::zero()),
            Some(m) => (y, x, m),
        },
    };
    let prec2 = p - msd_gros - 3;
    let appr2 = autre.get_appr(prec2)?;
    if appr2.is_zero() {
        return Ok(BigInt::zero());
    }
    let msd_autre = prec2 + nb_bits(&appr2) - 1;
    let prec1 = p - msd_autre - 3;
    let appr1 = gros.get_appr(prec1)?;
    let scale_digits = prec1 + prec2 - p;
    Ok(scale(&(appr1 * appr2), scale_digits))
}

fn approx_inverse(x: &Cr, p: i32) -> Resultat<BigInt> {
    let msd = x.msd_certain()?;
    let inv_msd = 1 - msd;
    let digits_needed = inv_msd - p + 3;
    let prec_needed = msd - digits_needed;
    let log_scale_factor = -p - prec_needed;
    if log_scale_factor < 0 {
        return Ok(BigInt::zero());
    }
    let dividende = BigInt::one() << (log_scale_factor as usize);
    let diviseur = x.get_appr(prec_needed)?;
    let abs_diviseur = diviseur.abs();
    let ajuste = dividende + (&abs_diviseur >> 1usize);
    let q = ajuste / abs_diviseur;
    Ok(if diviseur.is_negative() { -q } else { q })
}

/// x^n, n >= 2 : une seule approximation de x, puis carrés successifs en virgule fixe.
///
/// |x| < 2^(m+1) donne |x^n| < 2^(n·(m+1)) ; on garde sig + bits(n) + 8 bits
/// significatifs, sig étant le nombre de bits du résultat au-dessus de 2^p.
fn approx_puissance(x: &Cr, n: &BigInt, p: i32) -> Resultat<BigInt> {
    // |x| <= 2^plancher suffit à rendre x^n négligeable
    let plancher = match n.to_i64() {
        Some(n) => (p as i64 - 1).div_euclid(n),
        None if p >= 1 => 0,
        None => -1,
    };
    let Some(m) = x.msd((plancher - 1) as i32)? else {
        return Ok(BigInt::zero());
    };
    let haut = n * BigInt::from(m + 1);
    if haut < BigInt::from(p) {
        return Ok(BigInt::zero());
    }
    let sig = (haut - p).to_i32().ok_or(CalcError::PrecisionOverflow)?;
    verifier_precision(sig)?;
    let garde = i64::from(sig) + n.bits() as i64 + 8;
    let prec_x = i32::try_from(i64::from(m) - 1 - garde).map_err(|_| CalcError::PrecisionOverflow)?;
    let appr_x = x.get_appr(prec_x)?;
    let negatif = appr_x.is_negative() && n.bit(0);
    let base = appr_x.abs();

    // valeur courante = mantisse · 2^exposant
    let largeur = garde as u64 + 2;
    let mut mantisse = BigInt::one();
    let mut exposant: i64 = 0;
    for bit in (0..n.bits()).rev() {
        verifier_interruption()?;
        mantisse = &mantisse * &mantisse;
        exposant *= 2;
        if n.bit(bit) {
            mantisse *= &base;
            exposant += i64::from(prec_x);
        }
        let exces = mantisse.bits().saturating_sub(largeur);
        if exces > 0 {
            mantisse >>= exces as usize;
            exposant += exces as i64;
        }
        // |x^j| < 2^log_haut < 1 : les 2^bit élévations restantes passent sous 2^p
        let log_haut = mantisse.bits() as i64 + exposant + 1;
        if log_haut < 0 && (bit >= 40 || log_haut.saturating_mul(1i64 << bit) < i64::from(p) - 1) {
            return Ok(BigInt::zero());
        }
    }
    let decalage = i32::try_from(exposant - i64::from(p)).map_err(|_| CalcError::PrecisionOverflow)?;
    let a = scale(&mantisse, decalage);
    Ok(if negatif { -a } else { a })
}

/// Série de Taylor de exp, |x| < 1/2.
fn approx_exp(x: &Cr, p: i32) -> Resultat<BigInt> {
    if p >= 1 {
        return Ok(BigInt::zero());
    }
    let iterations = -p / 2 + 2;
    let calc_prec = p - bound_log2(2 * iterations) - 4;
    let op_prec = p - 3;
    let op_appr = x.get_appr(op_prec)?;
    let un_scale = BigInt::one() << ((-calc_prec) as usize);
    let mut terme = un_scale.clone();
    let mut somme = un_scale;
    let mut n: i64 = 0;
    let max_err = BigInt::one() << ((p - 4 - calc_prec) as usize);
    while terme.abs() >= max_err {
        verifier_interruption()?;
        n += 1;
        terme = scale(&(&terme * &op_appr), op_prec);
        terme /= n;
        somme += &terme;
    }
    Ok(scale(&somme, calc_prec - p))
}

/// Série de cos, |x| < 1.
fn approx_cos(x: &Cr, p: i32) -> Resultat<BigInt> {
    if p >= 1 {
        return Ok(BigInt::zero());
    }
    let iterations = -p / 2 + 4;
    let calc_prec = p - bound_log2(2 * iterations) - 4;
    let op_prec = p - 2;
    let op_appr = x.get_appr(op_prec)?;
    let max_err = BigInt::one() << ((p - 4 - calc_prec) as usize);
    let mut n: i64 = 0;
    let mut terme = BigInt::one() << ((-calc_prec) as usize);
    let mut somme = terme.clone();
    while terme.abs() >= max_err {
        verifier_interruption()?;
        n += 2;
        terme = scale(&(&terme * &op_appr), op_prec);
        terme = scale(&(&terme * &op_appr), op_prec);
        terme /= -n * (n - 1);
        somme += &terme;
    }
    Ok(scale(&somme, calc_prec - p))
}

/// Série de ln(1 + x), |x| < 1/2.
fn approx_ln(x: &Cr, p: i32) -> Resultat<BigInt> {
    if p >= 0 {
        return Ok(BigInt::zero());
    }
    let iterations = -p;
    let calc_prec = p - bound_log2(2 * iterations) - 4;
    let op_prec = p - 3;
    let op_appr = x.get_appr(op_prec)?;
    let mut x_nth = scale(&op_appr, op_prec - calc_prec);
    let mut terme = x_nth.clone();
    let mut somme = terme.clone();
    let mut n: i64 = 1;
    let mut signe: i64 = 1;
    let max_err = BigInt::one() << ((p - 4 - calc_prec) as usize);
    while terme.abs() >= max_err {
        verifier_interruption()?;
        n += 1;
        signe = -signe;
        x_nth = scale(&(&x_nth * &op_appr), op_prec);
        terme = &x_nth / (n * signe);
        somme += &terme;
    }
    Ok(scale(&somme, calc_prec - p))
}

/// Série de atan(x) = x - x³/3 + x⁵/5 ..., |x| < 1/2.
fn approx_atan(x: &Cr, p: i32) -> Resultat<BigInt> {
    if p >= 1 {
        return Ok(BigInt::zero());
    }
    let iterations = -p + 4;
    let calc_prec = p - bound_log2(2 * iterations) - 4;
    let op_prec = p - 3;
    let op_appr = x.get_appr(op_prec)?;
    let mut x_nth = scale(&op_appr, op_prec - calc_prec);
    let mut terme = x_nth.clone();
    let mut somme = terme.clone();
    let mut n: i64 = 1;
    let mut signe: i64 = 1;
    let max_err = BigInt::one() << ((p - 4 - calc_prec) as usize);
    while terme.abs() >= max_err {
        verifier_interruption()?;
        n += 2;
        signe = -signe;
        x_nth = scale(&(&x_nth * &op_appr), op_prec);
        x_nth = scale(&(&x_nth * &op_appr), op_prec);
        terme = &x_nth / (n * signe);
        somme += &terme;
    }
    Ok(scale(&somme, calc_prec - p))
}

/// atan(1/n), série à entiers (Machin).
fn approx_atan_inverse(op: i32, p: i32) -> Resultat<BigInt> {
    if p >= 1 {
        return Ok(BigInt::zero());
    }
    let iterations = -p / 2 + 2;
    let calc_prec = p - bound_log2(2 * iterations) - 2;
    let un_scale = BigInt::one() << ((-calc_prec) as usize);
    let op_carre = BigInt::from(op as i64 * op as i64);
    let op_inverse = un_scale / op;
    let mut puissance = op_inverse.clone();
    let mut terme = op_inverse.clone();
    let mut somme = op_inverse;
    let mut signe: i64 = 1;
    let mut n: i64 = 1;
    let max_err = BigInt::one() << ((p - 2 - calc_prec) as usize);
    while terme.abs() >= max_err {
        verifier_interruption()?;
        n += 2;
        puissance /= &op_carre;
        signe = -signe;
        terme = &puissance / (signe * n);
        somme += &terme;
    }
    Ok(scale(&somme, calc_prec - p))
}

/* ------------------------ Constantes partagées ------------------------ */

static PI: OnceLock<Cr> = OnceLock::new();
static DEMI_PI: OnceLock<Cr> = OnceLock::new();
static LN2: OnceLock<Cr> = OnceLock::new();

/// π = 4·(4·atan(1/5) - atan(1/239))
pub fn pi() -> Cr {
    PI.get_or_init(|| {
        let quatre = Cr::entier(4);
        let a5 = Cr::nouveau(Op::AtanInverseEntier(5));
        let a239 = Cr::nouveau(Op::AtanInverseEntier(239));
        quatre.multiply(&quatre.multiply(&a5).subtract(&a239))
    })
    .clone()
}

pub fn demi_pi() -> Cr {
    DEMI_PI.get_or_init(|| pi().shift_right(1)).clone()
}

/// ln 2 = 7·ln(10/9) - 2·ln(25/24) + 3·ln(81/80)
pub fn ln2() -> Cr {
    LN2.get_or_init(|| {
        let ln_1_plus = |n: i64, d: i64| Cr::ln_1_plus(Cr::fraction(&BigInt::from(n), &BigInt::from(d)));
        let a = Cr::entier(7).multiply(&ln_1_plus(1, 9));
        let b = Cr::entier(2).multiply(&ln_1_plus(1, 24));
        let c = Cr::entier(3).multiply(&ln_1_plus(1, 80));
        a.subtract(&b).add(&c)
    })
    .clone()
}

/// e = exp(1/1024)^(2^10), sans sonder.
pub fn e_construit() -> Cr {
    let mut r = Cr::nouveau(Op::ExpPrescale(Cr::fraction(
        &BigInt::one(),
        &BigInt::from(1024),
    )));
    for _ in 0..10 {
        r = r.multiply(&r);
    }
    r
}

/// ln(n) pour n ∈ {3,5,7}, construit sur ln 2 sans sonder.
pub fn ln_petit_entier(n: u32) -> Option<Cr> {
    let f = |a: i64, b: i64| Cr::ln_1_plus(Cr::fraction(&BigInt::from(a), &BigInt::from(b)));
    match n {
        2 => Some(ln2()),
        // ln 3 = ln 2 - ln(1 - 1/3)
        3 => Some(ln2().subtract(&f(-1, 3))),
        // ln 5 = 2 ln 2 + ln(1 + 1/4)
        5 => Some(ln2().shift_left(1).add(&f(1, 4))),
        // ln 7 = 3 ln 2 + ln(1 - 1/8)
        7 => Some(Cr::entier(3).multiply(&ln2()).add(&f(-1, 8))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// x·10^chiffres tronqué, pour comparer à une référence décimale.
    fn decimal(x: &Cr, chiffres: u32) -> BigInt {
        let s = x.multiply(&Cr::entier(BigInt::from(10).pow(chiffres)));
        s.get_appr(0).unwrap()
    }

    fn proche(x: &Cr, attendu: &str, chiffres: u32) {
        let a = decimal(x, chiffres);
        let ref_: BigInt = attendu.parse().unwrap();
        assert!((a - ref_).abs() <= BigInt::from(1), "attendu ≈ {attendu}");
    }

    #[test]
    fn pi_30_chiffres() {
        proche(&pi(), "3141592653589793238462643383279", 30);
    }

    #[test]
    fn e_et_ln2() {
        proche(&e_construit(), "2718281828459045235360287471352", 30);
        proche(&ln2(), "693147180559945309417232121458", 30);
    }

    #[test]
    fn racines() {
        proche(&Cr::entier(2).sqrt(), "1414213562373095048801688724209", 30);
        proche(&Cr::entier(10).sqrt(), "31622776601683793319988935444327", 31);
    }

    #[test]
    fn ln_sur_petits_entiers() {
        proche(&ln_petit_entier(3).unwrap(), "1098612288668109691395245236922", 30);
        proche(&ln_petit_entier(7).unwrap(), "1945910149055313305105352743443", 30);
        proche(&Cr::entier(10).ln().unwrap(), "2302585092994045684017991454684", 30);
    }

    #[test]
    fn trigonometrie_numerique() {
        let un = Cr::un();
        proche(&un.sin().unwrap(), "841470984807896506652502321630", 30);
        proche(&un.cos().unwrap(), "540302305868139717400936607442", 30);
        proche(&un.atan().unwrap(), "785398163397448309615660845819", 30);
        let demi = Cr::fraction(&BigInt::one(), &BigInt::from(2));
        proche(&demi.asin().unwrap(), "523598775598298873077107230546", 30);
        // grand angle : réduction par multiples de π
        proche(&Cr::entier(100).sin().unwrap(), "-506365641109758", 15);
    }

    #[test]
    fn exp_grand_argument() {
        proche(&Cr::entier(10).exp().unwrap(), "22026465794806716516957900645284", 27);
    }

    #[test]
    fn comparaison_et_signe() {
        let a = Cr::entier(2).sqrt();
        let b = Cr::fraction(&BigInt::from(141), &BigInt::from(100));
        assert_eq!(a.compare_to(&b).unwrap(), 1);
        assert_eq!(b.subtract(&a).signum().unwrap(), -1);
        // égalité numérique : seule la comparaison tolérante termine
        let c = a.multiply(&a);
        assert_eq!(c.compare_to_abs(&Cr::entier(2), -100).unwrap(), 0);
    }

    #[test]
    fn puissance_entiere_d_un_seul_noeud() {
        let x = Cr::fraction(&BigInt::from(3), &BigInt::from(2));
        proche(&x.pow_entier(&BigInt::from(10)), "57665039062500000000", 18);
        let moins = Cr::fraction(&BigInt::from(-1), &BigInt::from(3));
        proche(&moins.pow_entier(&BigInt::from(5)), "-4115226337448559670781893", 27);
        proche(&Cr::entier(2).sqrt().pow_entier(&BigInt::from(7)), "11313708498984760390", 18);
        proche(&Cr::entier(2).pow_entier(&BigInt::from(-3)), "125000000000", 12);
    }

    #[test]
    fn puissance_d_un_reel_minuscule_sans_recursion() {
        // exp(-2000)^(10^1000) : profondeur constante, résultat nul à toute précision utile
        let x = Cr::entier(-2000).exp().unwrap();
        let n = BigInt::from(10).pow(1000);
        let p = x.pow_entier(&n);
        assert!(p.get_appr(-200).unwrap().is_zero());
        // 0.999…^(10^1000) aussi
        let presque_un = Cr::fraction(&BigInt::from(999), &BigInt::from(1000));
        assert!(presque_un.pow_entier(&n).get_appr(-64).unwrap().is_zero());
    }

    #[test]
    fn racine_negative_refusee() {
        let r = Cr::entier(-4).sqrt().get_appr(-10);
        assert!(matches!(r, Err(CalcError::Domain(_))));
    }

    #[test]
    fn interruption_cooperative() {
        let drapeau = Arc::new(AtomicBool::new(true));
        let _garde = installer_interruption(drapeau);
        let r = Cr::entier(3).sqrt().get_appr(-50);
        assert_eq!(r.unwrap_err(), CalcError::Aborted);
    }

    #[test]
    fn precision_bornee() {
        assert_eq!(
            Cr::un().get_appr(-(1 << 29)).unwrap_err(),
            CalcError::PrecisionOverflow
        );
    }
}
