// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parser for the `.dc` field-classification schema.
//!
//! Deliberately not a full DC compiler: no imports, no inheritance, no typedefs.
//! Just enough grammar for the classifier to answer `(class, field) -> flags`.

use crate::flags::{FieldFlags, FieldType};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{cut, map, opt, recognize, value},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

/// One `name : type flag* [= default];` declaration inside a class body.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: FieldType,
    pub flags: FieldFlags,
    pub default: Option<DefaultLiteral>,
}

/// A literal default value as written in the DC source, before wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultLiteral {
    Int(i64),
    Str(String),
}

/// One `class NAME [: id] { field* };` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub explicit_id: Option<u16>,
    pub fields: Vec<FieldDecl>,
}

/// Parse a complete `.dc` source file into its class declarations.
pub fn parse_dc_file(input: &str) -> Result<Vec<ClassDecl>, String> {
    match all_classes(input) {
        Ok((rest, classes)) => {
            if rest.trim().is_empty() {
                Ok(classes)
            } else {
                Err(format!("unconsumed input near: {:?}", &rest[..rest.len().min(40)]))
            }
        }
        Err(e) => Err(format!("dc parse error: {e}")),
    }
}

fn all_classes(input: &str) -> IResult<&str, Vec<ClassDecl>> {
    delimited(multispace0, many0(class_decl), multispace0)(input)
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn class_decl(input: &str) -> IResult<&str, ClassDecl> {
    let (input, _) = ws(tag("class"))(input)?;
    let (input, name) = cut(ident)(input)?;
    let (input, explicit_id) = opt(preceded(ws(char(':')), uint_literal_u16))(input)?;
    let (input, fields) = cut(delimited(
        ws(char('{')),
        many0(ws(field_decl)),
        ws(char('}')),
    ))(input)?;
    let (input, _) = cut(ws(char(';')))(input)?;
    Ok((
        input,
        ClassDecl {
            name: name.to_string(),
            explicit_id,
            fields,
        },
    ))
}

fn field_decl(input: &str) -> IResult<&str, FieldDecl> {
    let (input, name) = ident(input)?;
    let (input, _) = ws(char(':'))(input)?;
    let (input, ty) = cut(field_type)(input)?;
    let (input, flags) = many0(ws(field_flag))(input)?;
    let (input, default) = opt(preceded(ws(char('=')), cut(default_literal)))(input)?;
    let (input, _) = cut(ws(char(';')))(input)?;

    let mut collected = FieldFlags::default();
    for flag in flags {
        apply_flag(&mut collected, flag);
    }

    Ok((
        input,
        FieldDecl {
            name: name.to_string(),
            ty,
            flags: collected,
            default,
        },
    ))
}

fn field_type(input: &str) -> IResult<&str, FieldType> {
    alt((
        value(FieldType::U8, tag("uint8")),
        value(FieldType::U16, tag("uint16")),
        value(FieldType::U32, tag("uint32")),
        value(FieldType::U64, tag("uint64")),
        value(FieldType::I8, tag("int8")),
        value(FieldType::I16, tag("int16")),
        value(FieldType::I32, tag("int32")),
        value(FieldType::I64, tag("int64")),
        value(FieldType::String, tag("string")),
        value(FieldType::Blob, tag("blob")),
    ))(input)
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    Required,
    Ram,
    Db,
    Broadcast,
    Ownrecv,
    Clrecv,
    Airecv,
}

fn field_flag(input: &str) -> IResult<&str, Flag> {
    alt((
        value(Flag::Required, tag("required")),
        value(Flag::Broadcast, tag("broadcast")),
        value(Flag::Ownrecv, tag("ownrecv")),
        value(Flag::Clrecv, tag("clrecv")),
        value(Flag::Airecv, tag("airecv")),
        value(Flag::Ram, tag("ram")),
        value(Flag::Db, tag("db")),
    ))(input)
}

fn apply_flag(flags: &mut FieldFlags, flag: Flag) {
    match flag {
        Flag::Required => flags.required = true,
        Flag::Ram => flags.ram = true,
        Flag::Db => flags.db = true,
        Flag::Broadcast => flags.broadcast = true,
        Flag::Ownrecv => flags.ownrecv = true,
        Flag::Clrecv => flags.clrecv = true,
        Flag::Airecv => flags.airecv = true,
    }
}

fn uint_literal_u16(input: &str) -> IResult<&str, u16> {
    map(digit1, |s: &str| s.parse::<u16>().unwrap_or(0))(input)
}

fn default_literal(input: &str) -> IResult<&str, DefaultLiteral> {
    alt((
        map(string_literal, DefaultLiteral::Str),
        map(
            recognize(pair(opt(char('-')), digit1)),
            |s: &str| DefaultLiteral::Int(s.parse::<i64>().unwrap_or(0)),
        ),
    ))(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            nom::bytes::complete::escaped_transform(
                nom::character::complete::none_of("\"\\"),
                '\\',
                alt((
                    value('\\', char('\\')),
                    value('"', char('"')),
                    value('\n', char('n')),
                )),
            ),
            char('"'),
        ),
        |s: String| s,
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        class DistributedTestObject5 : 5 {
          setRequired1 : uint32 required;
          setRDB3 : uint32 required db;
          setRDbD5 : uint8 ram db;
          setFoo : uint32 db;
          setBR1 : string broadcast ram;
        };

        class DistributedTestObject3 : 3 {
          setRDB3 : uint32 db;
        };
    "#;

    #[test]
    fn parses_sample_schema() {
        let classes = parse_dc_file(SAMPLE).expect("parses");
        assert_eq!(classes.len(), 2);

        let dto5 = &classes[0];
        assert_eq!(dto5.name, "DistributedTestObject5");
        assert_eq!(dto5.explicit_id, Some(5));
        assert_eq!(dto5.fields.len(), 5);

        let required1 = &dto5.fields[0];
        assert!(required1.flags.required);
        assert!(!required1.flags.db);

        let rdb3 = &dto5.fields[1];
        assert!(rdb3.flags.required && rdb3.flags.db);

        let rdbd5 = &dto5.fields[2];
        assert!(rdbd5.flags.ram && rdbd5.flags.db);

        let br1 = &dto5.fields[4];
        assert!(br1.flags.broadcast && br1.flags.ram);
        assert_eq!(br1.ty, FieldType::String);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_dc_file("not a dc file at all").is_err());
    }

    #[test]
    fn parses_default_literal() {
        let src = r#"
            class WithDefault {
              setHp : uint32 required = 100;
            };
        "#;
        let classes = parse_dc_file(src).unwrap();
        assert_eq!(
            classes[0].fields[0].default,
            Some(DefaultLiteral::Int(100))
        );
    }
}
