//! Tests fuzz safe : robustesse + déterminisme + limites contrôlées.
//!
//! But : marteler le noyau sans brûler la machine.
//! - tirages reproductibles (splitmix64, graine fixe par test)
//! - expressions tapées touche par touche, comme au clavier
//! - profondeur bornée, échéance globale par test
//! - on accepte certaines erreurs attendues (division par zéro, hors domaine)
//! - invariant clé : l'arithmétique bornée coïncide avec num-rational tant que le plafond tient

use std::time::{Duration, Instant};

use num_bigint::BigInt;
use num_rational::BigRational;

use super::erreurs::CalcError;
use super::eval::eval;
use super::eval::tests::{saisir, TableResolver};
use super::expr::Expression;
use super::jetons::Opcode;
use super::rationnel::BoundedRational;

/* ------------------------ Tirages reproductibles ------------------------ */

struct Tirages(u64);

impl Tirages {
    fn suivant(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Entier uniforme dans [0, n), n > 0.
    fn sous(&mut self, n: usize) -> usize {
        (self.suivant() % n as u64) as usize
    }

    fn un_sur(&mut self, n: usize) -> bool {
        self.sous(n) == 0
    }

    /// Entier uniforme dans [-borne, borne].
    fn signe(&mut self, borne: i64) -> i64 {
        self.sous((2 * borne + 1) as usize) as i64 - borne
    }

    fn parmi<T: Copy>(&mut self, choix: &[T]) -> T {
        choix[self.sous(choix.len())]
    }
}

/* ------------------------ Échéance par test ------------------------ */

struct Echeance {
    debut: Instant,
    max: Duration,
}

impl Echeance {
    fn de(max: Duration) -> Self {
        Self {
            debut: Instant::now(),
            max,
        }
    }

    fn tenir(&self) {
        if self.debut.elapsed() > self.max {
            panic!("campagne trop longue : {:?}", self.max);
        }
    }
}

/* ------------------------ Helpers fuzz ------------------------ */

fn is_erreur_attendue(e: &CalcError) -> bool {
    // Liste blanche : erreurs *normales* pour des expressions tirées au hasard.
    matches!(
        e,
        CalcError::DivisionByZero | CalcError::Domain(_) | CalcError::PrecisionOverflow
    )
}

/// Même fraction brute des deux côtés ; dénominateurs de signe quelconque.
fn tirer_fraction(t: &mut Tirages) -> (BoundedRational, BigRational) {
    let n = t.signe(5_000);
    let d = match t.signe(300) {
        0 => 1,
        d => d,
    };
    (
        BoundedRational::new(n, d),
        BigRational::new(BigInt::from(n), BigInt::from(d)),
    )
}

fn meme_valeur(a: &BoundedRational, b: &BigRational) -> bool {
    let r = a.reduce();
    r.numerateur() == b.numer() && r.denominateur() == b.denom()
}

/* ------------------------ Saisie au clavier (bornée) ------------------------ */

fn taper(e: &mut Expression, touches: &[Opcode]) {
    for op in touches {
        assert!(e.add(*op), "touche {op:?} refusée après {e}");
    }
}

/// Littéral sans zéro de tête, parfois décimal.
fn taper_nombre(t: &mut Tirages, e: &mut Expression) {
    let n = t.sous(100) as u8;
    if n >= 10 {
        taper(e, &[Opcode::Digit(n / 10), Opcode::Digit(n % 10)]);
    } else {
        taper(e, &[Opcode::Digit(n)]);
    }
    if t.un_sur(4) {
        taper(e, &[Opcode::DecimalPoint, Opcode::Digit(t.sous(10) as u8)]);
    }
}

fn taper_atome(t: &mut Tirages, e: &mut Expression) {
    match t.sous(7) {
        0 => taper(e, &[Opcode::ConstPi]),
        1 => taper(e, &[Opcode::ConstE]),
        2 => {
            taper(e, &[Opcode::Sqrt]);
            taper_nombre(t, e);
        }
        3 => {
            taper(e, &[Opcode::Ln]);
            taper_nombre(t, e);
            taper(e, &[Opcode::RParen]);
        }
        _ => taper_nombre(t, e),
    }
}

/// Sous-expression complète : atome, ou parenthèse fermée par construction.
fn taper_expr(t: &mut Tirages, e: &mut Expression, profondeur: usize) {
    if profondeur == 0 {
        return taper_atome(t, e);
    }
    match t.sous(10) {
        0..=3 => {
            taper(e, &[Opcode::LParen]);
            taper_expr(t, e, profondeur - 1);
            taper(e, &[t.parmi(&[Opcode::Add, Opcode::Sub, Opcode::Mul, Opcode::Div])]);
            taper_expr(t, e, profondeur - 1);
            taper(e, &[Opcode::RParen]);
        }
        4 => {
            taper(e, &[t.parmi(&[Opcode::Sin, Opcode::Cos, Opcode::ArcTan])]);
            taper_expr(t, e, profondeur - 1);
            taper(e, &[Opcode::RParen]);
        }
        5 => {
            taper(e, &[Opcode::LParen]);
            taper_expr(t, e, profondeur - 1);
            taper(e, &[Opcode::RParen, Opcode::Pow, Opcode::Digit(t.sous(4) as u8)]);
        }
        6 => {
            taper(e, &[Opcode::LParen]);
            taper_expr(t, e, profondeur - 1);
            taper(e, &[Opcode::RParen, Opcode::Pct]);
        }
        7 => {
            taper(e, &[Opcode::LParen, Opcode::Sub]);
            taper_expr(t, e, profondeur - 1);
            taper(e, &[Opcode::RParen]);
        }
        _ => taper_expr(t, e, profondeur - 1),
    }
}

/* ------------------------ Somme équilibrée anti pile ------------------------ */

/// n fois `terme`, parenthésés deux à deux : profondeur log2(n).
fn taper_somme_equilibree(e: &mut Expression, terme: &[Opcode], n: usize) {
    if n == 1 {
        return taper(e, terme);
    }
    taper(e, &[Opcode::LParen]);
    taper_somme_equilibree(e, terme, n / 2);
    taper(e, &[Opcode::Add]);
    taper_somme_equilibree(e, terme, n - n / 2);
    taper(e, &[Opcode::RParen]);
}

/* ------------------------ Tests ------------------------ */

#[test]
fn fuzz_safe_reduction_idempotente() {
    let echeance = Echeance::de(Duration::from_millis(500));
    let mut t = Tirages(0x5EED);

    for _ in 0..500 {
        echeance.tenir();
        let (r, attendu) = tirer_fraction(&mut t);
        let a = r.reduce();
        let b = a.reduce();
        assert_eq!(a.numerateur(), b.numerateur());
        assert_eq!(a.denominateur(), b.denominateur());
        assert!(meme_valeur(&r, &attendu), "{r} contre {attendu}");
    }
}

#[test]
fn fuzz_safe_arithmetique_bornee_vs_num_rational() {
    let echeance = Echeance::de(Duration::from_millis(800));
    let mut t = Tirages(0xC0FFEE);

    for _ in 0..400 {
        echeance.tenir();
        let (a, ra) = tirer_fraction(&mut t);
        let (b, rb) = tirer_fraction(&mut t);

        let s = a.add(&b).expect("petits opérandes : pas de plafond");
        assert!(meme_valeur(&s, &(&ra + &rb)), "{a} + {b}");
        let d = a.subtract(&b).expect("petits opérandes : pas de plafond");
        assert!(meme_valeur(&d, &(&ra - &rb)), "{a} - {b}");
        let p = a.multiply(&b).expect("petits opérandes : pas de plafond");
        assert!(meme_valeur(&p, &(&ra * &rb)), "{a} * {b}");

        match a.divide(&b) {
            Ok(q) => {
                let q = q.expect("petits opérandes : pas de plafond");
                assert!(meme_valeur(&q, &(&ra / &rb)), "{a} / {b}");
            }
            Err(e) => {
                assert_eq!(e, CalcError::DivisionByZero);
                assert!(b.is_zero());
            }
        }
        assert_eq!(a.cmp(&b), ra.cmp(&rb), "{a} <=> {b}");
    }
}

#[test]
fn fuzz_safe_expressions_tapees() {
    let echeance = Echeance::de(Duration::from_secs(10));
    let mut t = Tirages(0xBADC0DE);

    let mut vues_ok = 0usize;
    let mut vues_err = 0usize;

    for _ in 0..120 {
        echeance.tenir();
        let mut e = Expression::new();
        taper_expr(&mut t, &mut e, 3);
        match eval(&e, t.un_sur(2), &TableResolver::default()) {
            Ok(v) => {
                // toute valeur obtenue se laisse tronquer
                if let Err(err) = v.to_string_truncated(12) {
                    assert!(is_erreur_attendue(&err), "troncature de {e} : {err}");
                }
                // une valeur rationnelle reconnue s'écrit exactement
                if let Some(r) = v.bounded_rational_value() {
                    assert_eq!(
                        v.to_string_truncated(12).unwrap(),
                        r.to_string_truncated(12),
                        "{e}"
                    );
                }
                vues_ok += 1;
            }
            Err(err) => {
                assert!(is_erreur_attendue(&err), "erreur non attendue pour {e} : {err}");
                vues_err += 1;
            }
        }
    }

    // On veut voir un mix des deux, sinon le fuzz ne “balaye” rien.
    assert!(vues_ok > 10, "trop peu de succès : {vues_ok}");
    assert!(vues_err > 0, "aucune erreur vue : saisies trop “sages”");
}

#[test]
fn fuzz_safe_saisie_et_octets() {
    let echeance = Echeance::de(Duration::from_millis(500));
    let mut t = Tirages(0xFEED);
    let clavier = [
        Opcode::Digit(1),
        Opcode::Digit(7),
        Opcode::Digit(0),
        Opcode::DecimalPoint,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Pow,
        Opcode::LParen,
        Opcode::RParen,
        Opcode::Sqrt,
        Opcode::Sin,
        Opcode::ConstPi,
        Opcode::Fact,
        Opcode::Pct,
        Opcode::TenPow,
    ];

    for _ in 0..200 {
        echeance.tenir();
        // frappe désordonnée : les touches refusées sont simplement ignorées
        let mut e = Expression::new();
        for _ in 0..t.sous(25) {
            e.add(t.parmi(&clavier));
            if t.un_sur(10) {
                e.delete();
            }
        }
        if t.un_sur(4) {
            e.add_exponent(t.signe(30) as i32);
        }
        let relu = Expression::from_bytes(&e.to_bytes().unwrap()).unwrap();
        assert_eq!(relu, e, "octets de {e}");
        // le rendu reste stable après relecture
        assert_eq!(relu.to_string(), e.to_string());
    }
}

#[test]
fn fuzz_safe_somme_equilibree_anti_pile() {
    let echeance = Echeance::de(Duration::from_secs(2));

    let mut e = Expression::new();
    taper_somme_equilibree(&mut e, &[Opcode::Digit(1), Opcode::Div, Opcode::Digit(2)], 800);
    let v = eval(&e, false, &TableResolver::default()).unwrap_or_else(|err| panic!("err: {err}"));
    echeance.tenir();

    // 800*(1/2) = 400
    assert_eq!(v.bounded_rational_value(), Some(BoundedRational::from(400)));
}

#[test]
fn fuzz_safe_puissances_iteratives() {
    let echeance = Echeance::de(Duration::from_secs(5));

    // grands exposants : ni récursion profonde ni blocage
    for texte in ["1.0000001^100000", "(1/2)^4096", "2^-2000", "exp(-2000)^10^1000"] {
        echeance.tenir();
        match eval(&saisir(texte), false, &TableResolver::default()) {
            Ok(v) => {
                v.to_string_truncated(5)
                    .unwrap_or_else(|err| panic!("{texte}: {err}"));
            }
            Err(err) => assert!(is_erreur_attendue(&err), "{texte}: {err}"),
        }
    }
    // résultats gigantesques : refusés sans être construits
    for texte in ["2^68719476736", "7^(10^12)", "exp(10^10)"] {
        echeance.tenir();
        let r = eval(&saisir(texte), false, &TableResolver::default());
        assert_eq!(r.unwrap_err(), CalcError::TimedOut, "{texte}");
    }
}
