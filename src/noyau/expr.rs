// src/noyau/expr.rs
//
// Expression éditable (suite de jetons).
// - add / delete / append : édition incrémentale, auto-correction des opérateurs
// - trailing_binary_ops_start : on n'évalue jamais les opérateurs binaires en fin
// - to_bytes / from_bytes : encodage binaire préfixé par la longueur
//
// IMPORTANT :
// - un Constant n'est jamais vide (sauf pendant une édition)
// - deux Constant/PreEval ne sont jamais adjacents : un × explicite est inséré

use std::fmt;

use super::erreurs::{CalcError, Resultat};
use super::jetons::{Nombre, Opcode, Token};

/* ------------------------ Codage binaire ------------------------ */

const TAG_CONSTANT: u8 = 0;
const TAG_PRE_EVAL: u8 = 2;

const SAW_DECIMAL: u8 = 0x1;
const HAS_EXPONENT: u8 = 0x2;

/// Curseur de lecture sur un flux sérialisé.
struct Lecteur<'a> {
    octets: &'a [u8],
    pos: usize,
}

impl<'a> Lecteur<'a> {
    fn new(octets: &'a [u8]) -> Self {
        Self { octets, pos: 0 }
    }

    fn prendre(&mut self, n: usize) -> Resultat<&'a [u8]> {
        let fin = self
            .pos
            .checked_add(n)
            .filter(|f| *f <= self.octets.len())
            .ok_or_else(|| CalcError::Format("flux tronqué".into()))?;
        let s = &self.octets[self.pos..fin];
        self.pos = fin;
        Ok(s)
    }

    fn octet(&mut self) -> Resultat<u8> {
        Ok(self.prendre(1)?[0])
    }

    fn entier(&mut self) -> Resultat<i32> {
        let b = self.prendre(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn texte(&mut self) -> Resultat<String> {
        let b = self.prendre(2)?;
        let n = u16::from_be_bytes([b[0], b[1]]) as usize;
        let s = self.prendre(n)?;
        String::from_utf8(s.to_vec()).map_err(|_| CalcError::Format("texte non UTF-8".into()))
    }
}

fn ecrire_texte(out: &mut Vec<u8>, s: &str) -> Resultat<()> {
    let n = u16::try_from(s.len()).map_err(|_| CalcError::Format("texte trop long".into()))?;
    out.extend_from_slice(&n.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

/* ------------------------ Expression ------------------------ */

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expression {
    jetons: Vec<Token>,
}

impl Expression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depuis_jetons(jetons: Vec<Token>) -> Self {
        Self { jetons }
    }

    /// Expression réduite à une référence vers `index`.
    pub fn abbreviate(index: i64, short: &str) -> Self {
        Self {
            jetons: vec![Token::PreEval {
                index,
                short: short.to_string(),
            }],
        }
    }

    pub fn jetons(&self) -> &[Token] {
        &self.jetons
    }

    pub fn len(&self) -> usize {
        self.jetons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jetons.is_empty()
    }

    pub fn clear(&mut self) {
        self.jetons.clear();
    }

    fn dernier_operateur(&self) -> Option<Opcode> {
        match self.jetons.last() {
            Some(Token::Operator(op)) => Some(*op),
            _ => None,
        }
    }

    pub fn has_trailing_constant(&self) -> bool {
        matches!(self.jetons.last(), Some(Token::Constant(_)))
    }

    pub fn has_trailing_binary_op(&self) -> bool {
        self.dernier_operateur().is_some_and(Opcode::is_binary)
    }

    /// Ajoute une touche ; false si elle est refusée (aucune modification).
    pub fn add(&mut self, op: Opcode) -> bool {
        if op == Opcode::TenPow {
            return self.add_ten_pow();
        }
        let dernier = self.dernier_operateur();

        // Un opérateur binaire remplace silencieusement le précédent
        if op.is_binary() && !op.is_prefix() {
            let refuse = self.jetons.is_empty()
                || dernier.is_some_and(|d| {
                    d == Opcode::LParen || d.is_func() || (d.is_prefix() && d != Opcode::Sub)
                });
            if refuse {
                return false;
            }
            while self.has_trailing_binary_op() {
                self.delete();
            }
        }

        if !op.is_const_piece() {
            self.jetons.push(Token::Operator(op));
            return true;
        }

        // Chiffre ou point : prolonge le littéral final, ou en commence un
        if let Some(Token::Constant(n)) = self.jetons.last_mut() {
            return match n.avec(op) {
                Some(suivant) => {
                    *n = suivant;
                    true
                }
                None => false,
            };
        }
        let Some(n) = Nombre::default().avec(op) else {
            return false;
        };
        if matches!(self.jetons.last(), Some(Token::PreEval { .. })) {
            self.jetons.push(Token::Operator(Opcode::Mul));
        }
        self.jetons.push(Token::Constant(n));
        true
    }

    /// Touche "10^" : ajoute 10 (avec × implicite si besoin) puis ^.
    fn add_ten_pow(&mut self) -> bool {
        let mut dix = Expression::new();
        dix.add(Opcode::Digit(1));
        dix.add(Opcode::Digit(0));
        self.append(&dix);
        self.add(Opcode::Pow)
    }

    /// Fixe l'exposant du littéral final ; false s'il n'y en a pas.
    pub fn add_exponent(&mut self, exp: i32) -> bool {
        match self.jetons.last_mut() {
            Some(Token::Constant(n)) => {
                *n = n.avec_exposant(exp);
                true
            }
            _ => false,
        }
    }

    pub fn remove_trailing_additive_operators(&mut self) {
        while matches!(
            self.dernier_operateur(),
            Some(Opcode::Add) | Some(Opcode::Sub)
        ) {
            self.jetons.pop();
        }
    }

    /// Concatène `autre` ; insère × entre deux opérandes adjacents.
    pub fn append(&mut self, autre: &Expression) {
        if let (Some(dernier), Some(premier)) = (self.jetons.last(), autre.jetons.first()) {
            let operande = |t: &Token| !matches!(t, Token::Operator(_));
            if operande(dernier) && operande(premier) {
                self.jetons.push(Token::Operator(Opcode::Mul));
            }
        }
        self.jetons.extend(autre.jetons.iter().cloned());
    }

    /// Annule la dernière saisie.
    pub fn delete(&mut self) {
        match self.jetons.last_mut() {
            None => {}
            Some(Token::Constant(n)) => {
                *n = n.sans_dernier();
                if n.is_empty() {
                    self.jetons.pop();
                }
            }
            Some(_) => {
                self.jetons.pop();
            }
        }
    }

    /// Début de la suite d'opérateurs binaires finaux (exclus de l'évaluation).
    pub fn trailing_binary_ops_start(&self) -> usize {
        let mut fin = self.jetons.len();
        while fin > 0 {
            match &self.jetons[fin - 1] {
                Token::Operator(op) if op.is_binary() => fin -= 1,
                _ => break,
            }
        }
        fin
    }

    /// Un seul littéral : rien à "évaluer" pour l'utilisateur.
    pub fn is_constant(&self) -> bool {
        matches!(self.jetons.as_slice(), [Token::Constant(_)])
    }

    /// Vrai si l'expression contient autre chose qu'un nombre (éventuellement négatif).
    pub fn has_interesting_ops(&self) -> bool {
        let fin = self.trailing_binary_ops_start();
        let mut debut = 0;
        if fin > debut && self.jetons[0].est_operateur(Opcode::Sub) {
            debut += 1;
        }
        self.jetons[debut..fin]
            .iter()
            .any(|t| matches!(t, Token::Operator(_)) || t.has_ellipsis())
    }

    pub fn has_trig_funcs(&self) -> bool {
        self.jetons
            .iter()
            .any(|t| matches!(t, Token::Operator(op) if op.is_trig_func()))
    }

    /// Index référencés directement par des PreEval.
    pub fn references(&self) -> impl Iterator<Item = i64> + '_ {
        self.jetons.iter().filter_map(|t| match t {
            Token::PreEval { index, .. } => Some(*index),
            _ => None,
        })
    }

    /* ---------------- Sérialisation ---------------- */

    pub fn to_bytes(&self) -> Resultat<Vec<u8>> {
        let mut out = Vec::new();
        let n = i32::try_from(self.jetons.len())
            .map_err(|_| CalcError::Format("expression trop longue".into()))?;
        out.extend_from_slice(&n.to_be_bytes());
        for t in &self.jetons {
            match t {
                Token::Constant(c) => {
                    out.push(TAG_CONSTANT);
                    ecrire_texte(&mut out, c.whole())?;
                    let mut drapeaux = 0u8;
                    if c.saw_decimal() {
                        drapeaux |= SAW_DECIMAL;
                    }
                    if c.exponent() != 0 {
                        drapeaux |= HAS_EXPONENT;
                    }
                    out.push(drapeaux);
                    if c.saw_decimal() {
                        ecrire_texte(&mut out, c.fraction())?;
                    }
                    if c.exponent() != 0 {
                        out.extend_from_slice(&c.exponent().to_be_bytes());
                    }
                }
                Token::Operator(op) => out.push(op.to_byte()),
                Token::PreEval { index, short } => {
                    let i = i32::try_from(*index)
                        .map_err(|_| CalcError::Format(format!("index {index} hors limites")))?;
                    out.push(TAG_PRE_EVAL);
                    out.extend_from_slice(&i.to_be_bytes());
                    ecrire_texte(&mut out, short)?;
                }
            }
        }
        Ok(out)
    }

    pub fn from_bytes(octets: &[u8]) -> Resultat<Self> {
        let mut l = Lecteur::new(octets);
        let n = l.entier()?;
        if n < 0 {
            return Err(CalcError::Format("longueur négative".into()));
        }
        let mut jetons = Vec::new();
        for _ in 0..n {
            let tag = l.octet()?;
            let t = if tag >= 0x20 {
                let op = Opcode::from_byte(tag)
                    .ok_or_else(|| CalcError::Format(format!("opérateur inconnu 0x{tag:02x}")))?;
                Token::Operator(op)
            } else if tag == TAG_CONSTANT {
                let whole = l.texte()?;
                let drapeaux = l.octet()?;
                let saw_decimal = drapeaux & SAW_DECIMAL != 0;
                let fraction = if saw_decimal { l.texte()? } else { String::new() };
                let exponent = if drapeaux & HAS_EXPONENT != 0 { l.entier()? } else { 0 };
                Token::Constant(Nombre::new(&whole, saw_decimal, &fraction, exponent))
            } else if tag == TAG_PRE_EVAL {
                let index = l.entier()?;
                let short = l.texte()?;
                if index == -1 {
                    // ancien codage du point décimal seul
                    Token::Constant(Nombre::new("", true, "", 0))
                } else {
                    Token::PreEval {
                        index: index as i64,
                        short,
                    }
                }
            } else {
                return Err(CalcError::Format(format!("type de jeton inconnu {tag}")));
            };
            jetons.push(t);
        }
        Ok(Self { jetons })
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.jetons {
            write!(f, "{t}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noyau::jetons::{touches, Touche};

    fn saisir(s: &str) -> Expression {
        let mut e = Expression::new();
        for t in touches(s).unwrap() {
            match t {
                Touche::Op(op) => {
                    e.add(op);
                }
                Touche::Exposant(x) => {
                    e.add_exponent(x);
                }
            }
        }
        e
    }

    #[test]
    fn edition_simple() {
        let e = saisir("12+3.5");
        assert_eq!(e.len(), 3);
        assert_eq!(e.to_string(), "12+3.5");
        assert!(e.has_trailing_constant());
    }

    #[test]
    fn operateur_binaire_remplace() {
        let mut e = saisir("5+");
        assert!(e.add(Opcode::Mul));
        assert_eq!(e.to_string(), "5×");
        // "−" est préfixe : il s'ajoute au lieu de remplacer
        assert!(e.add(Opcode::Sub));
        assert_eq!(e.to_string(), "5×−");
        assert!(e.add(Opcode::Div));
        assert_eq!(e.to_string(), "5÷");
    }

    #[test]
    fn operateur_binaire_refuse() {
        let mut e = Expression::new();
        assert!(!e.add(Opcode::Mul));
        let mut e = saisir("(");
        assert!(!e.add(Opcode::Add));
        let mut e = saisir("sin(");
        assert!(!e.add(Opcode::Div));
        let mut e = saisir("√");
        assert!(!e.add(Opcode::Pow));
        assert_eq!(e.len(), 1);
    }

    #[test]
    fn suppression() {
        let mut e = saisir("12.5+π");
        e.delete();
        assert_eq!(e.to_string(), "12.5+");
        e.delete();
        e.delete();
        assert_eq!(e.to_string(), "12.");
        e.delete();
        e.delete();
        assert_eq!(e.to_string(), "1");
        e.delete();
        assert!(e.is_empty());
        e.delete();
        assert!(e.is_empty());
    }

    #[test]
    fn concatenation_implicite() {
        let mut a = saisir("2");
        a.append(&saisir("3"));
        assert_eq!(a.to_string(), "2×3");
        let mut b = saisir("2+");
        b.append(&saisir("3"));
        assert_eq!(b.to_string(), "2+3");
        let mut c = Expression::abbreviate(-4, "1.5");
        assert!(c.add(Opcode::Digit(7)));
        assert_eq!(c.to_string(), "1.5×7");
    }

    #[test]
    fn dix_puissance() {
        let mut e = saisir("3");
        assert!(e.add(Opcode::TenPow));
        assert_eq!(e.to_string(), "3×10^");
        let mut e = Expression::new();
        assert!(e.add(Opcode::TenPow));
        assert_eq!(e.to_string(), "10^");
    }

    #[test]
    fn operateurs_finaux() {
        let mut e = saisir("3+4×");
        assert_eq!(e.trailing_binary_ops_start(), 3);
        e.remove_trailing_additive_operators();
        assert_eq!(e.len(), 4);
        let mut f = saisir("3+−");
        f.remove_trailing_additive_operators();
        assert_eq!(f.to_string(), "3");
    }

    #[test]
    fn operations_interessantes() {
        assert!(!saisir("−12").has_interesting_ops());
        assert!(!saisir("12+").has_interesting_ops());
        assert!(saisir("1+2").has_interesting_ops());
        assert!(Expression::abbreviate(3, "0.33…").has_interesting_ops());
        assert!(!Expression::abbreviate(3, "5").has_interesting_ops());
        assert!(saisir("12").is_constant());
        assert!(saisir("cos(0)").has_trig_funcs());
        assert!(!saisir("ln(2)").has_trig_funcs());
    }

    #[test]
    fn exposant() {
        let e = saisir("6.02E23");
        assert_eq!(e.to_string(), "6.02E23");
        let mut f = saisir("1+");
        assert!(!f.add_exponent(3));
    }

    #[test]
    fn aller_retour_binaire() {
        let mut e = saisir("−1234.5E-3×√(2)+sin(π)");
        e.append(&Expression::abbreviate(-7, "0.5"));
        let octets = e.to_bytes().unwrap();
        assert_eq!(Expression::from_bytes(&octets).unwrap(), e);
    }

    #[test]
    fn point_decimal_ancien_codage() {
        let mut octets = 1i32.to_be_bytes().to_vec();
        octets.push(TAG_PRE_EVAL);
        octets.extend_from_slice(&(-1i32).to_be_bytes());
        octets.extend_from_slice(&0u16.to_be_bytes());
        let e = Expression::from_bytes(&octets).unwrap();
        assert_eq!(e.to_string(), ".");
    }

    #[test]
    fn flux_invalides() {
        assert!(matches!(
            Expression::from_bytes(&[0, 0]),
            Err(CalcError::Format(_))
        ));
        assert!(matches!(
            Expression::from_bytes(&[0, 0, 0, 1, 0x05]),
            Err(CalcError::Format(_))
        ));
        assert!(matches!(
            Expression::from_bytes(&[0, 0, 0, 1, b'Z']),
            Err(CalcError::Format(_))
        ));
        let e = Expression::abbreviate(1 << 40, "x");
        assert!(matches!(e.to_bytes(), Err(CalcError::Format(_))));
    }
}
