use std::{fmt::Display, iter::Peekable, str::Chars};

use thiserror::Error;

use crate::{
    heap_table::{ColumnDefinition, DataType, Value},
    index::IndexType,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParserError {
    #[error("bad syntax near {0}")]
    BadSyntax(String),
    #[error("unterminated string constant")]
    UnterminatedString,
    #[error("integer constant {0} is out of range")]
    IntOutOfRange(String),
}

impl ParserError {
    fn near(token: &Option<Token>) -> Self {
        match token {
            Some(token) => ParserError::BadSyntax(token.to_string()),
            None => ParserError::BadSyntax("end of input".to_string()),
        }
    }
}

/// Column equalities joined by AND, in the order they were written
pub type Conditions = Vec<(String, Value)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateTable {
        table_name: String,
        columns: Vec<ColumnDefinition>,
        if_not_exists: bool,
    },
    CreateIndex {
        index_name: String,
        table_name: String,
        index_type: IndexType,
        columns: Vec<String>,
    },
    DropTable {
        table_name: String,
    },
    DropIndex {
        index_name: String,
        table_name: String,
    },
    ShowTables,
    ShowColumns {
        table_name: String,
    },
    ShowIndex {
        table_name: String,
    },
    Insert {
        table_name: String,
        /// `None` when the statement lists no columns and values follow schema order
        columns: Option<Vec<String>>,
        values: Vec<Value>,
    },
    Delete {
        table_name: String,
        conditions: Conditions,
    },
    Select {
        table_name: String,
        /// `None` for `*`
        columns: Option<Vec<String>>,
        conditions: Conditions,
    },
}

/// Parse a single statement. A trailing `;` is allowed.
pub fn parse(sql: &str) -> Result<Statement, ParserError> {
    let mut parser = Parser::new(sql)?;
    let statement = parser.statement()?;
    if parser.lexer.match_delim(Lexer::SEMICOLON) {
        parser.lexer.eat_delim(Lexer::SEMICOLON)?;
    }
    if parser.lexer.current_token.is_some() {
        return Err(ParserError::near(&parser.lexer.current_token));
    }
    Ok(statement)
}

struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    fn new(string: &'a str) -> Result<Self, ParserError> {
        Ok(Self {
            lexer: Lexer::new(string)?,
        })
    }

    fn bad_syntax(&self) -> ParserError {
        ParserError::near(&self.lexer.current_token)
    }

    fn statement(&mut self) -> Result<Statement, ParserError> {
        if self.lexer.match_keyword("select") {
            self.query()
        } else if self.lexer.match_keyword("insert") {
            self.insert()
        } else if self.lexer.match_keyword("delete") {
            self.delete()
        } else if self.lexer.match_keyword("create") {
            self.create()
        } else if self.lexer.match_keyword("drop") {
            self.drop()
        } else if self.lexer.match_keyword("show") {
            self.show()
        } else {
            Err(self.bad_syntax())
        }
    }

    /// Parse a list of identifiers separated by commas
    fn field_list(&mut self) -> Result<Vec<String>, ParserError> {
        let mut list = Vec::new();
        list.push(self.lexer.eat_identifier()?);
        while self.lexer.match_delim(Lexer::COMMA) {
            self.lexer.eat_delim(Lexer::COMMA)?;
            list.push(self.lexer.eat_identifier()?);
        }
        Ok(list)
    }

    fn constant(&mut self) -> Result<Value, ParserError> {
        if self.lexer.match_string_constant() {
            return Ok(Value::Text(self.lexer.eat_string_constant()?));
        }
        Ok(Value::Int(self.lexer.eat_int_constant()?))
    }

    fn constants(&mut self) -> Result<Vec<Value>, ParserError> {
        let mut const_list = Vec::new();
        const_list.push(self.constant()?);
        while self.lexer.match_delim(Lexer::COMMA) {
            self.lexer.eat_delim(Lexer::COMMA)?;
            const_list.push(self.constant()?);
        }
        Ok(const_list)
    }

    fn term(&mut self) -> Result<(String, Value), ParserError> {
        let column = self.lexer.eat_identifier()?;
        self.lexer.eat_delim(Lexer::EQUAL)?;
        Ok((column, self.constant()?))
    }

    fn terms(&mut self) -> Result<Conditions, ParserError> {
        let mut terms = Vec::new();
        terms.push(self.term()?);
        while self.lexer.match_keyword("and") {
            self.lexer.eat_keyword("and")?;
            terms.push(self.term()?);
        }
        Ok(terms)
    }

    fn where_clause(&mut self) -> Result<Conditions, ParserError> {
        if self.lexer.match_keyword("where") {
            self.lexer.eat_keyword("where")?;
            return self.terms();
        }
        Ok(Vec::new())
    }

    fn query(&mut self) -> Result<Statement, ParserError> {
        self.lexer.eat_keyword("select")?;
        let columns = if self.lexer.match_delim(Lexer::STAR) {
            self.lexer.eat_delim(Lexer::STAR)?;
            None
        } else {
            Some(self.field_list()?)
        };
        self.lexer.eat_keyword("from")?;
        let table_name = self.lexer.eat_identifier()?;
        let conditions = self.where_clause()?;
        Ok(Statement::Select {
            table_name,
            columns,
            conditions,
        })
    }

    fn insert(&mut self) -> Result<Statement, ParserError> {
        self.lexer.eat_keyword("insert")?;
        self.lexer.eat_keyword("into")?;
        let table_name = self.lexer.eat_identifier()?;
        let columns = if self.lexer.match_delim(Lexer::ROUND_OPEN) {
            self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
            let fields = self.field_list()?;
            self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
            Some(fields)
        } else {
            None
        };
        self.lexer.eat_keyword("values")?;
        self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
        let values = self.constants()?;
        self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
        Ok(Statement::Insert {
            table_name,
            columns,
            values,
        })
    }

    fn delete(&mut self) -> Result<Statement, ParserError> {
        self.lexer.eat_keyword("delete")?;
        self.lexer.eat_keyword("from")?;
        let table_name = self.lexer.eat_identifier()?;
        let conditions = self.where_clause()?;
        Ok(Statement::Delete {
            table_name,
            conditions,
        })
    }

    fn create(&mut self) -> Result<Statement, ParserError> {
        self.lexer.eat_keyword("create")?;
        if self.lexer.match_keyword("table") {
            self.create_table()
        } else if self.lexer.match_keyword("index") {
            self.create_index()
        } else {
            Err(self.bad_syntax())
        }
    }

    fn field_def(&mut self) -> Result<ColumnDefinition, ParserError> {
        let field_name = self.lexer.eat_identifier()?;
        let data_type = match self.lexer.current_token {
            Some(Token::Identifier(ref t)) if t == "int" || t == "integer" => DataType::Int,
            Some(Token::Identifier(ref t)) if t == "text" => DataType::Text,
            _ => return Err(self.bad_syntax()),
        };
        self.lexer.next_token()?;
        Ok(ColumnDefinition::new(&field_name, data_type))
    }

    fn field_defs(&mut self) -> Result<Vec<ColumnDefinition>, ParserError> {
        let mut columns = Vec::new();
        columns.push(self.field_def()?);
        while self.lexer.match_delim(Lexer::COMMA) {
            self.lexer.eat_delim(Lexer::COMMA)?;
            columns.push(self.field_def()?);
        }
        Ok(columns)
    }

    fn create_table(&mut self) -> Result<Statement, ParserError> {
        self.lexer.eat_keyword("table")?;
        let if_not_exists = self.lexer.match_keyword("if");
        if if_not_exists {
            self.lexer.eat_keyword("if")?;
            self.lexer.eat_keyword("not")?;
            self.lexer.eat_keyword("exists")?;
        }
        let table_name = self.lexer.eat_identifier()?;
        self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
        let columns = self.field_defs()?;
        self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
        Ok(Statement::CreateTable {
            table_name,
            columns,
            if_not_exists,
        })
    }

    fn create_index(&mut self) -> Result<Statement, ParserError> {
        self.lexer.eat_keyword("index")?;
        let index_name = self.lexer.eat_identifier()?;
        self.lexer.eat_keyword("on")?;
        let table_name = self.lexer.eat_identifier()?;
        let index_type = if self.lexer.match_keyword("using") {
            self.lexer.eat_keyword("using")?;
            let index_type = match self.lexer.current_token {
                Some(Token::Identifier(ref t)) if t == "btree" => IndexType::Btree,
                Some(Token::Identifier(ref t)) if t == "hash" => IndexType::Hash,
                _ => return Err(self.bad_syntax()),
            };
            self.lexer.next_token()?;
            index_type
        } else {
            IndexType::default()
        };
        self.lexer.eat_delim(Lexer::ROUND_OPEN)?;
        let columns = self.field_list()?;
        self.lexer.eat_delim(Lexer::ROUND_CLOSE)?;
        Ok(Statement::CreateIndex {
            index_name,
            table_name,
            index_type,
            columns,
        })
    }

    fn drop(&mut self) -> Result<Statement, ParserError> {
        self.lexer.eat_keyword("drop")?;
        if self.lexer.match_keyword("table") {
            self.lexer.eat_keyword("table")?;
            let table_name = self.lexer.eat_identifier()?;
            Ok(Statement::DropTable { table_name })
        } else if self.lexer.match_keyword("index") {
            self.lexer.eat_keyword("index")?;
            let index_name = self.lexer.eat_identifier()?;
            self.lexer.eat_keyword("from")?;
            let table_name = self.lexer.eat_identifier()?;
            Ok(Statement::DropIndex {
                index_name,
                table_name,
            })
        } else {
            Err(self.bad_syntax())
        }
    }

    fn show(&mut self) -> Result<Statement, ParserError> {
        self.lexer.eat_keyword("show")?;
        if self.lexer.match_keyword("index") {
            self.lexer.eat_keyword("index")?;
            self.lexer.eat_keyword("from")?;
            let table_name = self.lexer.eat_identifier()?;
            return Ok(Statement::ShowIndex { table_name });
        }
        match self.lexer.current_token {
            Some(Token::Identifier(ref t)) if t == "tables" => {
                self.lexer.next_token()?;
                Ok(Statement::ShowTables)
            }
            Some(Token::Identifier(ref t)) if t == "columns" => {
                self.lexer.next_token()?;
                self.lexer.eat_keyword("from")?;
                let table_name = self.lexer.eat_identifier()?;
                Ok(Statement::ShowColumns { table_name })
            }
            _ => Err(self.bad_syntax()),
        }
    }
}

#[cfg(test)]
mod parser_tests {
    use super::*;

    #[test]
    fn parse_basic_select_statement() {
        let sql = "SELECT name, age FROM users WHERE id = 3 AND name = 'John'";
        let stmt = parse(sql).unwrap();
        assert_eq!(
            stmt,
            Statement::Select {
                table_name: "users".to_string(),
                columns: Some(vec!["name".to_string(), "age".to_string()]),
                conditions: vec![
                    ("id".to_string(), Value::Int(3)),
                    ("name".to_string(), Value::Text("John".to_string())),
                ],
            }
        );
    }

    #[test]
    fn test_select_star() {
        let stmt = parse("select * from t;").unwrap();
        assert_eq!(
            stmt,
            Statement::Select {
                table_name: "t".to_string(),
                columns: None,
                conditions: vec![],
            }
        );
    }

    #[test]
    fn test_create_table() {
        let sql = "CREATE TABLE students (id int, name TEXT, age INTEGER)";
        let Statement::CreateTable {
            table_name,
            columns,
            if_not_exists,
        } = parse(sql).unwrap()
        else {
            panic!("Expected CreateTable");
        };
        assert_eq!(table_name, "students");
        assert!(!if_not_exists);
        assert_eq!(
            columns,
            vec![
                ColumnDefinition::int("id"),
                ColumnDefinition::text("name"),
                ColumnDefinition::int("age"),
            ]
        );
    }

    #[test]
    fn test_create_table_if_not_exists() {
        let stmt = parse("create table if not exists t1 (a int)").unwrap();
        assert!(matches!(
            stmt,
            Statement::CreateTable { ref table_name, if_not_exists: true, .. } if table_name == "t1"
        ));
    }

    #[test]
    fn test_create_table_rejects_unknown_type() {
        assert_eq!(
            parse("create table t (a varchar)"),
            Err(ParserError::BadSyntax("varchar".to_string()))
        );
    }

    #[test]
    fn test_insert() {
        let sql = "INSERT INTO users (name, age) VALUES ('Alice', -25)";
        let stmt = parse(sql).unwrap();
        assert_eq!(
            stmt,
            Statement::Insert {
                table_name: "users".to_string(),
                columns: Some(vec!["name".to_string(), "age".to_string()]),
                values: vec![Value::Text("Alice".to_string()), Value::Int(-25)],
            }
        );
    }

    #[test]
    fn test_insert_without_columns() {
        let stmt = parse("insert into t values (1, 'x')").unwrap();
        assert!(matches!(stmt, Statement::Insert { columns: None, ref values, .. } if values.len() == 2));
    }

    #[test]
    fn test_delete() {
        let stmt = parse("DELETE FROM users WHERE age = 30").unwrap();
        assert_eq!(
            stmt,
            Statement::Delete {
                table_name: "users".to_string(),
                conditions: vec![("age".to_string(), Value::Int(30))],
            }
        );
        assert_eq!(
            parse("delete from users").unwrap(),
            Statement::Delete {
                table_name: "users".to_string(),
                conditions: vec![],
            }
        );
    }

    #[test]
    fn test_create_index() {
        let stmt = parse("CREATE INDEX fx ON goober USING HASH (x, y)").unwrap();
        assert_eq!(
            stmt,
            Statement::CreateIndex {
                index_name: "fx".to_string(),
                table_name: "goober".to_string(),
                index_type: IndexType::Hash,
                columns: vec!["x".to_string(), "y".to_string()],
            }
        );

        let stmt = parse("create index ix on t (a)").unwrap();
        assert!(matches!(
            stmt,
            Statement::CreateIndex { index_type: IndexType::Btree, .. }
        ));
    }

    #[test]
    fn test_drop_statements() {
        assert_eq!(
            parse("drop table foo").unwrap(),
            Statement::DropTable {
                table_name: "foo".to_string()
            }
        );
        assert_eq!(
            parse("DROP INDEX fx FROM goober").unwrap(),
            Statement::DropIndex {
                index_name: "fx".to_string(),
                table_name: "goober".to_string(),
            }
        );
    }

    #[test]
    fn test_show_statements() {
        assert_eq!(parse("show tables").unwrap(), Statement::ShowTables);
        assert_eq!(
            parse("SHOW COLUMNS FROM t").unwrap(),
            Statement::ShowColumns {
                table_name: "t".to_string()
            }
        );
        assert_eq!(
            parse("show index from t").unwrap(),
            Statement::ShowIndex {
                table_name: "t".to_string()
            }
        );
    }

    #[test]
    fn test_bad_syntax_names_offending_token() {
        assert_eq!(
            parse("select from t"),
            Err(ParserError::BadSyntax("from".to_string()))
        );
        assert_eq!(
            parse("select a from t where"),
            Err(ParserError::BadSyntax("end of input".to_string()))
        );
        assert_eq!(
            parse("drop table a b"),
            Err(ParserError::BadSyntax("b".to_string()))
        );
        assert_eq!(
            parse("update t set a = 1"),
            Err(ParserError::BadSyntax("update".to_string()))
        );
    }

    #[test]
    fn test_lexical_errors() {
        assert_eq!(
            parse("select a from t where b = 'open"),
            Err(ParserError::UnterminatedString)
        );
        assert_eq!(
            parse("select a from t where b = 99999999999"),
            Err(ParserError::IntOutOfRange("99999999999".to_string()))
        );
        assert_eq!(
            parse("select a from t where b > 1"),
            Err(ParserError::BadSyntax(">".to_string()))
        );
    }
}

struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    keywords: Vec<String>,
    current_token: Option<Token>,
}

impl<'a> Lexer<'a> {
    const EQUAL: char = '=';
    const COMMA: char = ',';
    const ROUND_OPEN: char = '(';
    const ROUND_CLOSE: char = ')';
    const STAR: char = '*';
    const SEMICOLON: char = ';';

    fn new(string: &'a str) -> Result<Self, ParserError> {
        let keywords = [
            "select", "from", "where", "and", "insert", "into", "values", "delete", "create",
            "table", "index", "on", "using", "drop", "show", "if", "not", "exists",
        ];
        let mut lexer = Self {
            input: string.chars().peekable(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            current_token: None,
        };
        lexer.next_token()?;
        Ok(lexer)
    }

    fn parse_string(&mut self) -> Result<Token, ParserError> {
        self.input.next(); //  consume the opening quote
        let mut string = String::new();
        loop {
            match self.input.next() {
                Some('\'') => return Ok(Token::StringConstant(string)),
                Some(c) => string.push(c),
                None => return Err(ParserError::UnterminatedString),
            }
        }
    }

    fn parse_number(&mut self) -> Result<Token, ParserError> {
        let mut number = String::new();
        if let Some(&'-') = self.input.peek() {
            number.push('-');
            self.input.next();
        }
        while let Some(&c) = self.input.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            number.push(c);
            self.input.next();
        }
        number
            .parse()
            .map(Token::IntConstant)
            .map_err(|_| ParserError::IntOutOfRange(number))
    }

    fn parse_identifier_or_keyword(&mut self) -> Token {
        let mut string = String::new();
        while let Some(&c) = self.input.peek() {
            if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            string.push(c.to_ascii_lowercase());
            self.input.next();
        }
        if self.keywords.contains(&string) {
            return Token::Keyword(string);
        }
        Token::Identifier(string)
    }

    /// Advance to the next token, which becomes `current_token` and is returned.
    fn next_token(&mut self) -> Result<Option<Token>, ParserError> {
        while self.input.peek().is_some_and(|c| c.is_whitespace()) {
            self.input.next();
        }
        let Some(&c) = self.input.peek() else {
            self.current_token = None;
            return Ok(None);
        };
        let token = match c {
            Self::EQUAL
            | Self::COMMA
            | Self::ROUND_OPEN
            | Self::ROUND_CLOSE
            | Self::STAR
            | Self::SEMICOLON => {
                self.input.next();
                Token::Delimiter(c)
            }
            '\'' => self.parse_string()?,
            '-' => {
                let mut ahead = self.input.clone();
                ahead.next();
                if !ahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                    return Err(ParserError::BadSyntax("-".to_string()));
                }
                self.parse_number()?
            }
            c if c.is_ascii_digit() => self.parse_number()?,
            c if c.is_ascii_alphabetic() || c == '_' => self.parse_identifier_or_keyword(),
            other => return Err(ParserError::BadSyntax(other.to_string())),
        };
        self.current_token = Some(token.clone());
        Ok(Some(token))
    }

    fn match_delim(&self, ch: char) -> bool {
        matches!(self.current_token, Some(Token::Delimiter(d)) if d == ch)
    }

    fn eat_delim(&mut self, ch: char) -> Result<(), ParserError> {
        if !self.match_delim(ch) {
            return Err(ParserError::near(&self.current_token));
        }
        self.next_token()?;
        Ok(())
    }

    fn eat_int_constant(&mut self) -> Result<i32, ParserError> {
        let Some(Token::IntConstant(i)) = self.current_token else {
            return Err(ParserError::near(&self.current_token));
        };
        self.next_token()?;
        Ok(i)
    }

    fn match_string_constant(&self) -> bool {
        matches!(self.current_token, Some(Token::StringConstant(_)))
    }

    fn eat_string_constant(&mut self) -> Result<String, ParserError> {
        let Some(Token::StringConstant(s)) = self.current_token.clone() else {
            return Err(ParserError::near(&self.current_token));
        };
        self.next_token()?;
        Ok(s)
    }

    fn eat_identifier(&mut self) -> Result<String, ParserError> {
        let Some(Token::Identifier(id)) = self.current_token.clone() else {
            return Err(ParserError::near(&self.current_token));
        };
        self.next_token()?;
        Ok(id)
    }

    fn match_keyword(&self, keyword: &str) -> bool {
        matches!(&self.current_token, Some(Token::Keyword(token)) if token == keyword)
    }

    fn eat_keyword(&mut self, keyword: &str) -> Result<String, ParserError> {
        if !self.match_keyword(keyword) {
            return Err(ParserError::near(&self.current_token));
        }
        let Some(Token::Keyword(keyword)) = self.current_token.clone() else {
            return Err(ParserError::near(&self.current_token));
        };
        self.next_token()?;
        Ok(keyword)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Keyword(String),
    Identifier(String),
    IntConstant(i32),
    StringConstant(String),
    Delimiter(char),
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Keyword(s) | Token::Identifier(s) => write!(f, "{s}"),
            Token::IntConstant(i) => write!(f, "{i}"),
            Token::StringConstant(s) => write!(f, "'{s}'"),
            Token::Delimiter(c) => write!(f, "{c}"),
        }
    }
}
