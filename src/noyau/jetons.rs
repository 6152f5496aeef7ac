// src/noyau/jetons.rs
//
// Jetons de l'expression
// ----------------------
// - Opcode : touches (chiffres, opérateurs, fonctions, constantes)
// - Nombre : littéral en cours de saisie (valeur reconstruite à chaque édition)
// - Token  : Constant | Operator | PreEval (référence à une expression déjà évaluée)
// - touches() : texte tapé -> suite de touches (terminal, tests)

use std::fmt;

use num_bigint::BigInt;

use super::erreurs::{CalcError, Resultat};
use super::lecture::{add_commas, exponent_end, exposant_depuis_texte, ELLIPSE};
use super::rationnel::BoundedRational;

/// Exposant au-delà duquel on refuse d'ajouter des chiffres.
const EXPOSANT_MAX_SAISIE: i32 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Digit(u8),
    DecimalPoint,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Fact,
    Sqr,
    Pct,
    Sqrt,
    LParen,
    RParen,
    ConstPi,
    ConstE,
    Sin,
    Cos,
    Tan,
    ArcSin,
    ArcCos,
    ArcTan,
    Ln,
    Log,
    Exp,
    /// Macro "10^" (jamais stockée telle quelle)
    TenPow,
}

impl Opcode {
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            Opcode::Pow | Opcode::Mul | Opcode::Div | Opcode::Add | Opcode::Sub
        )
    }

    /// Peut précéder son argument ("−" est à la fois binaire et préfixe).
    pub fn is_prefix(self) -> bool {
        matches!(self, Opcode::Sqrt | Opcode::Sub)
    }

    pub fn is_suffix(self) -> bool {
        matches!(self, Opcode::Fact | Opcode::Sqr | Opcode::Pct)
    }

    /// Fonction : ouvre implicitement une parenthèse.
    pub fn is_func(self) -> bool {
        matches!(
            self,
            Opcode::Sin
                | Opcode::Cos
                | Opcode::Tan
                | Opcode::ArcSin
                | Opcode::ArcCos
                | Opcode::ArcTan
                | Opcode::Ln
                | Opcode::Log
                | Opcode::Exp
        )
    }

    pub fn is_trig_func(self) -> bool {
        matches!(
            self,
            Opcode::Sin | Opcode::Cos | Opcode::Tan | Opcode::ArcSin | Opcode::ArcCos | Opcode::ArcTan
        )
    }

    pub fn digit_value(self) -> Option<u8> {
        match self {
            Opcode::Digit(d) if d <= 9 => Some(d),
            _ => None,
        }
    }

    /// Chiffre ou point décimal : morceau de littéral.
    pub fn is_const_piece(self) -> bool {
        self.digit_value().is_some() || self == Opcode::DecimalPoint
    }

    /// Code d'un octet (>= 0x20) pour la sérialisation.
    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Digit(d) => b'0' + d.min(9),
            Opcode::DecimalPoint => b'.',
            Opcode::Add => b'+',
            Opcode::Sub => b'-',
            Opcode::Mul => b'*',
            Opcode::Div => b'/',
            Opcode::Pow => b'^',
            Opcode::Fact => b'!',
            Opcode::Sqr => b'Q',
            Opcode::Pct => b'%',
            Opcode::Sqrt => b'R',
            Opcode::LParen => b'(',
            Opcode::RParen => b')',
            Opcode::ConstPi => b'p',
            Opcode::ConstE => b'e',
            Opcode::Sin => b's',
            Opcode::Cos => b'c',
            Opcode::Tan => b't',
            Opcode::ArcSin => b'S',
            Opcode::ArcCos => b'C',
            Opcode::ArcTan => b'T',
            Opcode::Ln => b'l',
            Opcode::Log => b'L',
            Opcode::Exp => b'E',
            Opcode::TenPow => b'X',
        }
    }

    pub fn from_byte(b: u8) -> Option<Opcode> {
        let op = match b {
            b'0'..=b'9' => Opcode::Digit(b - b'0'),
            b'.' => Opcode::DecimalPoint,
            b'+' => Opcode::Add,
            b'-' => Opcode::Sub,
            b'*' => Opcode::Mul,
            b'/' => Opcode::Div,
            b'^' => Opcode::Pow,
            b'!' => Opcode::Fact,
            b'Q' => Opcode::Sqr,
            b'%' => Opcode::Pct,
            b'R' => Opcode::Sqrt,
            b'(' => Opcode::LParen,
            b')' => Opcode::RParen,
            b'p' => Opcode::ConstPi,
            b'e' => Opcode::ConstE,
            b's' => Opcode::Sin,
            b'c' => Opcode::Cos,
            b't' => Opcode::Tan,
            b'S' => Opcode::ArcSin,
            b'C' => Opcode::ArcCos,
            b'T' => Opcode::ArcTan,
            b'l' => Opcode::Ln,
            b'L' => Opcode::Log,
            b'E' => Opcode::Exp,
            _ => return None,
        };
        Some(op)
    }

    /// Forme affichée.
    pub fn symbole(self) -> String {
        let s = match self {
            Opcode::Digit(d) => return d.to_string(),
            Opcode::DecimalPoint => ".",
            Opcode::Add => "+",
            Opcode::Sub => "−",
            Opcode::Mul => "×",
            Opcode::Div => "÷",
            Opcode::Pow => "^",
            Opcode::Fact => "!",
            Opcode::Sqr => "²",
            Opcode::Pct => "%",
            Opcode::Sqrt => "√",
            Opcode::LParen => "(",
            Opcode::RParen => ")",
            Opcode::ConstPi => "π",
            Opcode::ConstE => "e",
            Opcode::Sin => "sin(",
            Opcode::Cos => "cos(",
            Opcode::Tan => "tan(",
            Opcode::ArcSin => "sin⁻¹(",
            Opcode::ArcCos => "cos⁻¹(",
            Opcode::ArcTan => "tan⁻¹(",
            Opcode::Ln => "ln(",
            Opcode::Log => "log(",
            Opcode::Exp => "exp(",
            Opcode::TenPow => "10^",
        };
        s.to_string()
    }
}

/* ------------------------ Littéral ------------------------ */

/// Littéral numérique : partie entière, partie fractionnaire, exposant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Nombre {
    whole: String,
    fraction: String,
    saw_decimal: bool,
    exponent: i32,
}

impl Nombre {
    pub fn new(whole: &str, saw_decimal: bool, fraction: &str, exponent: i32) -> Self {
        Self {
            whole: whole.to_string(),
            fraction: fraction.to_string(),
            saw_decimal,
            exponent,
        }
    }

    pub fn whole(&self) -> &str {
        &self.whole
    }

    pub fn fraction(&self) -> &str {
        &self.fraction
    }

    pub fn saw_decimal(&self) -> bool {
        self.saw_decimal
    }

    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    /// Littéral prolongé d'un chiffre ou d'un point ; None si refusé.
    pub fn avec(&self, op: Opcode) -> Option<Nombre> {
        let mut n = self.clone();
        if op == Opcode::DecimalPoint {
            if n.saw_decimal || n.exponent != 0 {
                return None;
            }
            n.saw_decimal = true;
            return Some(n);
        }
        let v = op.digit_value()? as i32;
        if n.exponent != 0 {
            if n.exponent.abs() > EXPOSANT_MAX_SAISIE {
                return None;
            }
            n.exponent = if n.exponent > 0 {
                10 * n.exponent + v
            } else {
                10 * n.exponent - v
            };
            return Some(n);
        }
        if n.saw_decimal {
            n.fraction.push((b'0' + v as u8) as char);
        } else {
            n.whole.push((b'0' + v as u8) as char);
        }
        Some(n)
    }

    pub fn avec_exposant(&self, exp: i32) -> Nombre {
        Nombre {
            exponent: exp,
            ..self.clone()
        }
    }

    /// Littéral privé de sa dernière saisie.
    pub fn sans_dernier(&self) -> Nombre {
        let mut n = self.clone();
        if n.exponent != 0 {
            n.exponent /= 10;
        } else if !n.fraction.is_empty() {
            n.fraction.pop();
        } else if n.saw_decimal {
            n.saw_decimal = false;
        } else {
            n.whole.pop();
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        !self.saw_decimal && self.whole.is_empty()
    }

    pub fn to_rational(&self) -> Resultat<BoundedRational> {
        let whole = if self.whole.is_empty() {
            if self.fraction.is_empty() {
                return Err(CalcError::syntax("littéral vide"));
            }
            "0"
        } else {
            self.whole.as_str()
        };
        let chiffres = format!("{whole}{}", self.fraction);
        let mut num = BigInt::parse_bytes(chiffres.as_bytes(), 10)
            .ok_or_else(|| CalcError::syntax("littéral invalide"))?;
        let dix = BigInt::from(10);
        let mut den = dix.pow(self.fraction.len() as u32);
        if self.exponent > 0 {
            num *= dix.pow(self.exponent as u32);
        }
        if self.exponent < 0 {
            den *= dix.pow(self.exponent.unsigned_abs());
        }
        Ok(BoundedRational::new(num, den))
    }
}

impl fmt::Display for Nombre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exponent != 0 {
            write!(f, "{}", self.whole)?;
        } else {
            write!(f, "{}", add_commas(&self.whole, 0, self.whole.len()))?;
        }
        if self.saw_decimal {
            write!(f, ".{}", self.fraction)?;
        }
        if self.exponent != 0 {
            write!(f, "E{}", self.exponent)?;
        }
        Ok(())
    }
}

/* ------------------------ Jetons ------------------------ */

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Constant(Nombre),
    Operator(Opcode),
    /// Référence à l'expression `index`, affichée sous sa forme abrégée.
    PreEval { index: i64, short: String },
}

impl Token {
    pub fn est_operateur(&self, op: Opcode) -> bool {
        matches!(self, Token::Operator(o) if *o == op)
    }

    pub fn has_ellipsis(&self) -> bool {
        matches!(self, Token::PreEval { short, .. } if short.contains(ELLIPSE))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Constant(n) => write!(f, "{n}"),
            Token::Operator(op) => write!(f, "{}", op.symbole()),
            Token::PreEval { short, .. } => write!(f, "{short}"),
        }
    }
}

/* ------------------------ Texte -> touches ------------------------ */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Touche {
    Op(Opcode),
    /// Exposant "E-12" collé au littéral précédent.
    Exposant(i32),
}

/// Traduit un texte tapé en touches de calculatrice.
///
/// Supporte:
/// - chiffres, point (ou virgule) décimal, exposant collé "1.5E-3"
/// - + - * / ^ ! % ( ) et leurs glyphes − × ÷ ² √ π
/// - mots : sin cos tan asin/arcsin acos/arccos atan/arctan ln log exp sqrt pi e
///   (une "(" qui suit immédiatement une fonction est absorbée)
pub fn touches(s: &str) -> Resultat<Vec<Touche>> {
    let mut out = Vec::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i: usize = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if let Some(d) = c.to_digit(10) {
            out.push(Touche::Op(Opcode::Digit(d as u8)));
            i += 1;
            continue;
        }

        // Exposant collé : seulement après un chiffre ou un point
        if c == 'E' && i > 0 && (chars[i - 1].is_ascii_digit() || chars[i - 1] == '.') {
            let reste: String = chars[i..].iter().take_while(|c| c.is_ascii()).collect();
            let fin = exponent_end(&reste, 0);
            if fin > 0 {
                out.push(Touche::Exposant(exposant_depuis_texte(&reste, 0, fin)));
                i += fin;
                continue;
            }
            return Err(CalcError::syntax("exposant invalide"));
        }

        let op = match c {
            '.' | ',' => Some(Opcode::DecimalPoint),
            '+' => Some(Opcode::Add),
            '-' | '−' => Some(Opcode::Sub),
            '*' | '×' => Some(Opcode::Mul),
            '/' | '÷' => Some(Opcode::Div),
            '^' => Some(Opcode::Pow),
            '!' => Some(Opcode::Fact),
            '²' => Some(Opcode::Sqr),
            '%' => Some(Opcode::Pct),
            '√' => Some(Opcode::Sqrt),
            '(' => Some(Opcode::LParen),
            ')' => Some(Opcode::RParen),
            'π' => Some(Opcode::ConstPi),
            _ => None,
        };
        if let Some(op) = op {
            out.push(Touche::Op(op));
            i += 1;
            continue;
        }

        // Mots : [a-zA-Z]+
        if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_alphabetic() {
                i += 1;
            }
            let mot: String = chars[start..i].iter().collect::<String>().to_lowercase();
            let op = match mot.as_str() {
                "pi" => Opcode::ConstPi,
                "e" => Opcode::ConstE,
                "sqrt" => Opcode::Sqrt,
                "sin" => Opcode::Sin,
                "cos" => Opcode::Cos,
                "tan" => Opcode::Tan,
                "asin" | "arcsin" => Opcode::ArcSin,
                "acos" | "arccos" => Opcode::ArcCos,
                "atan" | "arctan" => Opcode::ArcTan,
                "ln" => Opcode::Ln,
                "log" => Opcode::Log,
                "exp" => Opcode::Exp,
                _ => return Err(CalcError::syntax(format!("mot inconnu: '{mot}'"))),
            };
            out.push(Touche::Op(op));
            if op.is_func() && i < chars.len() && chars[i] == '(' {
                i += 1;
            }
            continue;
        }

        return Err(CalcError::syntax(format!("caractère inattendu: '{c}'")));
    }

    Ok(out)
}

/// Format utilitaire (debug) : liste de touches en texte.
pub fn format_touches(t: &[Touche]) -> String {
    t.iter()
        .map(|t| match t {
            Touche::Op(op) => op.symbole(),
            Touche::Exposant(e) => format!("E{e}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
