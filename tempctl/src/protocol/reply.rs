/// Which view of a reply the caller wants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewKind {
    Raw,
    Fields,
    Function,
    Parameters,
    Composite,
}

/// A reply decoded into exactly one view
#[derive(Clone, Debug, PartialEq)]
pub enum ReplyView {
    Raw(String),
    Fields(Vec<String>),
    Function(String),
    Parameters(Parameters),
    Composite(ParsedReply),
}

/// Numeric fields following the function field
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameters {
    /// Fields that failed to parse hold 0.0
    pub values: Vec<f64>,
    /// Cleared by the first unparsable field
    pub valid: bool,
}

/// Every view of a reply at once
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedReply {
    pub raw: String,
    pub fields: Vec<String>,
    pub function: String,
    pub parameters: Vec<f64>,
    pub valid: bool,
}

/// One line received from the device, terminators removed
///
/// Views are computed on demand so a caller after the raw text never pays for
/// number parsing.
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    raw: String,
    delimiter: char,
    received: bool,
}

impl Reply {
    pub fn new(line: &str, delimiter: char, terminator: char) -> Self {
        Self {
            raw: line.chars().filter(|&c| c != '\r' && c != '\n' && c != terminator).collect(),
            delimiter,
            received: true,
        }
    }

    /// Placeholder for a read that timed out
    pub fn empty(delimiter: char) -> Self {
        Self {
            raw: String::new(),
            delimiter,
            received: false,
        }
    }

    /// False when nothing arrived within the read timeout
    pub fn is_received(&self) -> bool {
        self.received
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }

    pub fn fields(&self) -> Vec<&str> {
        self.raw.split(self.delimiter).collect()
    }

    /// First field, available even when the parameters are garbage
    pub fn function(&self) -> &str {
        self.raw.split(self.delimiter).next().unwrap_or_default()
    }

    pub fn parameters(&self) -> Parameters {
        let mut parameters = Parameters {
            values: Vec::new(),
            valid: self.received,
        };
        for field in self.raw.split(self.delimiter).skip(1) {
            match field.trim().parse::<f64>() {
                Ok(value) => parameters.values.push(value),
                Err(_) => {
                    if parameters.valid {
                        log::warn!("Unparsable field {:?} in reply {:?}", field, self.raw);
                    }
                    parameters.valid = false;
                    parameters.values.push(0.0);
                },
            }
        }
        parameters
    }

    /// Composite view; valid only if a line arrived and every parameter parsed
    pub fn parsed(&self) -> ParsedReply {
        let parameters = self.parameters();
        ParsedReply {
            raw: self.raw.clone(),
            fields: self.fields().into_iter().map(String::from).collect(),
            function: self.function().to_string(),
            parameters: parameters.values,
            valid: parameters.valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.parameters().valid
    }

    pub fn view(&self, kind: ViewKind) -> ReplyView {
        match kind {
            ViewKind::Raw => ReplyView::Raw(self.raw.clone()),
            ViewKind::Fields => ReplyView::Fields(self.fields().into_iter().map(String::from).collect()),
            ViewKind::Function => ReplyView::Function(self.function().to_string()),
            ViewKind::Parameters => ReplyView::Parameters(self.parameters()),
            ViewKind::Composite => ReplyView::Composite(self.parsed()),
        }
    }
}
