/*
 * Responsibility
 * - handler 向け extractor (Principal)
 */
mod principal;
