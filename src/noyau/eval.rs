// src/noyau/eval.rs
//
// Évaluation d'une Expression en UnifiedReal (descente récursive en une passe).
//
// Précédence (de la plus forte à la plus faible) :
//   unaire (√, constantes, (…), fonctions, PreEval)
//   -> suffixes (! ² %) répétés
//   -> puissance (^ suivi d'un facteur signé)
//   -> facteur signé (− en tête)
//   -> terme (× ÷ et multiplication implicite)
//   -> expression (+ −, avec la règle "a + N%" = a·(1 + N/100))
//
// Les références PreEval sont résolues par un ExprResolver ; leur fermeture
// transitive est évaluée d'abord, dans l'ordre inverse du parcours en largeur,
// pour borner la profondeur de récursion.

use std::sync::Arc;

use super::erreurs::{CalcError, Resultat};
use super::expr::Expression;
use super::jetons::{Opcode, Token};
use super::reel::UnifiedReal;
use super::trig::TrigFn;

/// Accès aux expressions référencées par index.
pub trait ExprResolver: Send + Sync {
    fn get_expr(&self, index: i64) -> Resultat<Arc<Expression>>;
    fn get_degree_mode(&self, index: i64) -> bool;
    fn get_result(&self, index: i64) -> Option<UnifiedReal>;
    /// Premier écrivain gagnant : renvoie la valeur effectivement retenue.
    fn put_result_if_absent(&self, index: i64, valeur: UnifiedReal) -> UnifiedReal;
}

struct Contexte<'a> {
    /// Préfixe évalué (sans les opérateurs binaires finaux).
    jetons: &'a [Token],
    degres: bool,
    resolver: &'a dyn ExprResolver,
}

fn un_centieme() -> UnifiedReal {
    UnifiedReal::fraction(1, 100)
}

fn trig_de(op: Opcode) -> Option<TrigFn> {
    match op {
        Opcode::Sin => Some(TrigFn::Sin),
        Opcode::Cos => Some(TrigFn::Cos),
        Opcode::Tan => Some(TrigFn::Tan),
        Opcode::ArcSin => Some(TrigFn::ArcSin),
        Opcode::ArcCos => Some(TrigFn::ArcCos),
        Opcode::ArcTan => Some(TrigFn::ArcTan),
        _ => None,
    }
}

impl<'a> Contexte<'a> {
    fn est_operateur(&self, i: usize, op: Opcode) -> bool {
        self.jetons.get(i).is_some_and(|t| t.est_operateur(op))
    }

    fn jeton(&self, i: usize) -> Resultat<&'a Token> {
        self.jetons
            .get(i)
            .ok_or_else(|| CalcError::syntax("fin d'expression inattendue"))
    }

    fn vers_radians(&self, x: UnifiedReal) -> UnifiedReal {
        if self.degres {
            x.multiply(&UnifiedReal::radians_par_degre())
        } else {
            x
        }
    }

    fn depuis_radians(&self, x: UnifiedReal) -> Resultat<UnifiedReal> {
        if self.degres {
            x.divide(&UnifiedReal::radians_par_degre())
        } else {
            Ok(x)
        }
    }

    fn valeur_reference(&self, index: i64) -> Resultat<UnifiedReal> {
        match self.resolver.get_result(index) {
            Some(v) => Ok(v),
            None => nested_eval(index, self.resolver),
        }
    }

    /// Argument d'une fonction : expression, ")" facultative.
    fn argument(&self, i: usize) -> Resultat<(usize, UnifiedReal)> {
        let (mut pos, val) = self.eval_expr(i)?;
        if self.est_operateur(pos, Opcode::RParen) {
            pos += 1;
        }
        Ok((pos, val))
    }

    fn eval_unary(&self, i: usize) -> Resultat<(usize, UnifiedReal)> {
        let op = match self.jeton(i)? {
            Token::Constant(c) => return Ok((i + 1, UnifiedReal::rationnel(c.to_rational()?))),
            Token::PreEval { index, .. } => return Ok((i + 1, self.valeur_reference(*index)?)),
            Token::Operator(op) => *op,
        };

        if let Some(f) = trig_de(op) {
            let (pos, x) = self.argument(i + 1)?;
            let v = if f.est_reciproque() {
                self.depuis_radians(f.appliquer(&x)?)?
            } else {
                f.appliquer(&self.vers_radians(x))?
            };
            return Ok((pos, v));
        }

        match op {
            Opcode::ConstPi => Ok((i + 1, UnifiedReal::pi())),
            Opcode::ConstE => Ok((i + 1, UnifiedReal::e())),
            Opcode::Sqrt => {
                // accepte un − directement après √
                if self.est_operateur(i + 1, Opcode::Sub) {
                    let (pos, x) = self.eval_unary(i + 2)?;
                    Ok((pos, x.negate().sqrt()?))
                } else {
                    let (pos, x) = self.eval_unary(i + 1)?;
                    Ok((pos, x.sqrt()?))
                }
            }
            Opcode::LParen => self.argument(i + 1),
            Opcode::Ln => {
                let (pos, x) = self.argument(i + 1)?;
                Ok((pos, x.ln()?))
            }
            Opcode::Exp => {
                let (pos, x) = self.argument(i + 1)?;
                Ok((pos, x.exp()?))
            }
            Opcode::Log => {
                let (pos, x) = self.argument(i + 1)?;
                Ok((pos, x.ln()?.divide(&UnifiedReal::from(10).ln()?)?))
            }
            _ => Err(CalcError::syntax(format!(
                "jeton inattendu '{}'",
                op.symbole()
            ))),
        }
    }

    fn eval_suffix(&self, i: usize) -> Resultat<(usize, UnifiedReal)> {
        let (mut pos, mut val) = self.eval_unary(i)?;
        loop {
            if self.est_operateur(pos, Opcode::Fact) {
                val = val.fact()?;
            } else if self.est_operateur(pos, Opcode::Sqr) {
                val = val.multiply(&val);
            } else if self.est_operateur(pos, Opcode::Pct) {
                val = val.multiply(&un_centieme());
            } else {
                break;
            }
            pos += 1;
        }
        Ok((pos, val))
    }

    fn eval_factor(&self, i: usize) -> Resultat<(usize, UnifiedReal)> {
        let (pos, val) = self.eval_suffix(i)?;
        if self.est_operateur(pos, Opcode::Pow) {
            let (pos, exposant) = self.eval_signed_factor(pos + 1)?;
            return Ok((pos, val.pow(&exposant)?));
        }
        Ok((pos, val))
    }

    fn eval_signed_factor(&self, i: usize) -> Resultat<(usize, UnifiedReal)> {
        let negatif = self.est_operateur(i, Opcode::Sub);
        let (pos, val) = self.eval_factor(if negatif { i + 1 } else { i })?;
        Ok((pos, if negatif { val.negate() } else { val }))
    }

    /// Le jeton i peut-il commencer un facteur (multiplication implicite) ?
    fn can_start_factor(&self, i: usize) -> bool {
        match self.jetons.get(i) {
            None => false,
            Some(Token::Operator(op)) => {
                !(op.is_binary() || *op == Opcode::Fact || *op == Opcode::RParen)
            }
            Some(_) => true,
        }
    }

    fn eval_term(&self, i: usize) -> Resultat<(usize, UnifiedReal)> {
        let (mut pos, mut val) = self.eval_signed_factor(i)?;
        loop {
            let mul = self.est_operateur(pos, Opcode::Mul);
            let div = self.est_operateur(pos, Opcode::Div);
            if !(mul || div || self.can_start_factor(pos)) {
                break;
            }
            if mul || div {
                pos += 1;
            }
            let (suivant, facteur) = self.eval_signed_factor(pos)?;
            val = if div {
                val.divide(&facteur)?
            } else {
                val.multiply(&facteur)
            };
            pos = suivant;
        }
        Ok((pos, val))
    }

    /// "N%" en position pos, suivi de la fin, de +, − ou ")".
    fn is_percent(&self, pos: usize) -> bool {
        if self.jetons.len() < pos + 2 || !self.est_operateur(pos + 1, Opcode::Pct) {
            return false;
        }
        if matches!(self.jetons[pos], Token::Operator(_)) {
            return false;
        }
        match self.jetons.get(pos + 2) {
            None => true,
            Some(Token::Operator(op)) => {
                matches!(op, Opcode::Add | Opcode::Sub | Opcode::RParen)
            }
            Some(_) => false,
        }
    }

    /// 1 ± N/100
    fn percent_factor(&self, pos: usize, soustraction: bool) -> Resultat<UnifiedReal> {
        let n = match self.jeton(pos)? {
            Token::Constant(c) => UnifiedReal::rationnel(c.to_rational()?),
            Token::PreEval { index, .. } => self.valeur_reference(*index)?,
            Token::Operator(_) => return Err(CalcError::syntax("pourcentage sans nombre")),
        };
        let pourcent = n.multiply(&un_centieme());
        let pourcent = if soustraction {
            pourcent.negate()
        } else {
            pourcent
        };
        Ok(UnifiedReal::one().add(&pourcent))
    }

    fn eval_expr(&self, i: usize) -> Resultat<(usize, UnifiedReal)> {
        let (mut pos, mut val) = self.eval_term(i)?;
        loop {
            let plus = self.est_operateur(pos, Opcode::Add);
            if !(plus || self.est_operateur(pos, Opcode::Sub)) {
                break;
            }
            if self.is_percent(pos + 1) {
                val = val.multiply(&self.percent_factor(pos + 1, !plus)?);
                pos += 3;
            } else {
                let (suivant, terme) = self.eval_term(pos + 1)?;
                val = if plus {
                    val.add(&terme)
                } else {
                    val.subtract(&terme)
                };
                pos = suivant;
            }
        }
        Ok((pos, val))
    }
}

/// Évalue le préfixe utile de `expr` ; tout jeton non consommé est une erreur.
fn eval_prefixe(
    expr: &Expression,
    degres: bool,
    resolver: &dyn ExprResolver,
) -> Resultat<UnifiedReal> {
    let fin = expr.trailing_binary_ops_start();
    let ctx = Contexte {
        jetons: &expr.jetons()[..fin],
        degres,
        resolver,
    };
    let (pos, val) = ctx.eval_expr(0)?;
    if pos != fin {
        return Err(CalcError::syntax("expression incomplète"));
    }
    Ok(val)
}

/// Évalue l'expression `index` et publie son résultat (premier écrivain gagnant).
pub fn nested_eval(index: i64, resolver: &dyn ExprResolver) -> Resultat<UnifiedReal> {
    let expr = resolver.get_expr(index)?;
    let val = eval_prefixe(&expr, resolver.get_degree_mode(index), resolver)?;
    Ok(resolver.put_result_if_absent(index, val))
}

/// Index référencés (directement ou non) et pas encore évalués,
/// dans un ordre où chaque référence précède celles qui l'utilisent.
pub fn transitively_referenced(
    expr: &Expression,
    resolver: &dyn ExprResolver,
) -> Resultat<Vec<i64>> {
    let mut liste: Vec<i64> = Vec::new();
    let ajouter = |e: &Expression, liste: &mut Vec<i64>| {
        for index in e.references() {
            if resolver.get_result(index).is_none() && !liste.contains(&index) {
                liste.push(index);
            }
        }
    };
    ajouter(expr, &mut liste);
    let mut parcourus = 0;
    while parcourus < liste.len() {
        let e = resolver.get_expr(liste[parcourus])?;
        ajouter(&e, &mut liste);
        parcourus += 1;
    }
    liste.reverse();
    Ok(liste)
}

/// API publique : valeur exacte (paresseuse) d'une expression.
pub fn eval(
    expr: &Expression,
    degres: bool,
    resolver: &dyn ExprResolver,
) -> Resultat<UnifiedReal> {
    for index in transitively_referenced(expr, resolver)? {
        nested_eval(index, resolver)?;
    }
    eval_prefixe(expr, degres, resolver)
}
