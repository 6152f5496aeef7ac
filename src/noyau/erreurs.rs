// src/noyau/erreurs.rs
//
// Erreurs du noyau
// ----------------
// - CalcError : erreur "riche" propagée par `?` dans toutes les couches
// - ErrorKind : énumération fermée vue par l'écouteur (classement unique, côté moteur)

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CalcError {
    #[error("erreur de syntaxe : {0}")]
    Syntax(String),

    #[error("division par zéro")]
    DivisionByZero,

    #[error("hors domaine : {0}")]
    Domain(String),

    #[error("dépassement de précision")]
    PrecisionOverflow,

    #[error("calcul interrompu")]
    Aborted,

    #[error("délai dépassé")]
    TimedOut,

    /// Flux sérialisé illisible (frontière de persistance).
    #[error("format invalide : {0}")]
    Format(String),

    /// Configuration illisible ou incohérente.
    #[error("configuration : {0}")]
    Config(String),
}

impl CalcError {
    pub fn syntax(msg: impl Into<String>) -> Self {
        CalcError::Syntax(msg.into())
    }

    pub fn domain(msg: impl Into<String>) -> Self {
        CalcError::Domain(msg.into())
    }

    /// Classement vu par l'écouteur.
    ///
    /// Un flux illisible est traité comme une erreur de syntaxe : l'utilisateur
    /// ne peut que corriger l'expression.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CalcError::Syntax(_) | CalcError::Format(_) | CalcError::Config(_) => {
                ErrorKind::SyntaxError
            }
            CalcError::DivisionByZero => ErrorKind::DivisionByZero,
            CalcError::Domain(_) => ErrorKind::DomainError,
            CalcError::PrecisionOverflow => ErrorKind::PrecisionOverflow,
            CalcError::Aborted => ErrorKind::Aborted,
            CalcError::TimedOut => ErrorKind::TimedOut,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SyntaxError,
    DivisionByZero,
    DomainError,
    PrecisionOverflow,
    Aborted,
    TimedOut,
}

impl ErrorKind {
    /// Message court affiché à la place du résultat.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "Erreur",
            ErrorKind::DivisionByZero => "Division par zéro",
            ErrorKind::DomainError => "Pas un nombre",
            ErrorKind::PrecisionOverflow => "Valeur trop grande",
            ErrorKind::Aborted => "Annulé",
            ErrorKind::TimedOut => "Calcul trop long",
        }
    }
}

pub type Resultat<T> = Result<T, CalcError>;
